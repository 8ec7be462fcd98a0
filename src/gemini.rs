// Model client façade.
//
// `Gemini` owns the session state (model name, optional system instruction,
// chat transcript) and talks to the service through a `GenerativeBackend`.
// The production backend is `api::ApiClient`; tests plug in their own.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{CliError, Result};
use crate::helpers::preprocess_input;
use crate::mime;
use crate::processor::{response_text, Accumulator};
use crate::types::{Content, FileHandle, FilePage, GenerateRequest, GenerateResponse, Part, Role};

/// What the façade needs from the remote service. Every call is a single,
/// blocking attempt.
pub trait GenerativeBackend {
    fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse>;

    /// Streamed generation. `on_chunk` sees each chunk as it arrives; the
    /// return value is the whole response.
    ///
    /// The default sends one non-streamed request and reports it as a single
    /// chunk.
    fn stream_generate(
        &self,
        model: &str,
        request: &GenerateRequest,
        on_chunk: &mut dyn FnMut(&GenerateResponse),
    ) -> Result<GenerateResponse> {
        let response = self.generate(model, request)?;
        on_chunk(&response);
        Ok(response)
    }

    fn upload_file(&self, path: &Path, display_name: Option<&str>, mime_type: &str) -> Result<FileHandle>;

    /// One page of the file listing; `None` asks for the first page.
    fn list_files_page(&self, page_token: Option<&str>) -> Result<FilePage>;

    /// Fetch by remote name (`files/<id>`).
    fn get_file(&self, name: &str) -> Result<FileHandle>;

    fn delete_file(&self, name: &str) -> Result<()>;
}

impl<B: GenerativeBackend + ?Sized> GenerativeBackend for Box<B> {
    fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        (**self).generate(model, request)
    }

    fn stream_generate(
        &self,
        model: &str,
        request: &GenerateRequest,
        on_chunk: &mut dyn FnMut(&GenerateResponse),
    ) -> Result<GenerateResponse> {
        (**self).stream_generate(model, request, on_chunk)
    }

    fn upload_file(&self, path: &Path, display_name: Option<&str>, mime_type: &str) -> Result<FileHandle> {
        (**self).upload_file(path, display_name, mime_type)
    }

    fn list_files_page(&self, page_token: Option<&str>) -> Result<FilePage> {
        (**self).list_files_page(page_token)
    }

    fn get_file(&self, name: &str) -> Result<FileHandle> {
        (**self).get_file(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        (**self).delete_file(name)
    }
}

pub struct Gemini<B: GenerativeBackend> {
    backend: B,
    model: String,
    system_instruction: Option<String>,
    history: Vec<Content>,
}

impl<B: GenerativeBackend> Gemini<B> {
    /// Build the façade. Fails with `MissingCredential` before the backend is
    /// ever used when the settings carry no usable key.
    pub fn new(settings: &Settings, backend: B) -> Result<Self> {
        settings.api_key()?;
        info!(model = %settings.model, "gemini session ready");
        Ok(Self {
            backend,
            model: settings.model.clone(),
            system_instruction: None,
            history: Vec::new(),
        })
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Prior turns of the running chat, oldest first.
    pub fn history(&self) -> &[Content] {
        &self.history
    }

    fn request(&self, contents: Vec<Content>) -> GenerateRequest {
        GenerateRequest::new(contents).system_instruction(self.system_instruction.as_deref())
    }

    /// Send one user turn built from `parts`.
    pub fn generate(&self, parts: Vec<Part>) -> Result<GenerateResponse> {
        debug!(parts = parts.len(), "generate");
        self.backend.generate(&self.model, &self.request(vec![Content::user(parts)]))
    }

    /// Streamed [`Gemini::generate`]; `on_chunk` gets the text of each chunk.
    pub fn stream(&self, parts: Vec<Part>, on_chunk: &mut dyn FnMut(&str)) -> Result<GenerateResponse> {
        debug!(parts = parts.len(), "stream");
        let request = self.request(vec![Content::user(parts)]);
        let mut acc = Accumulator::new();
        self.backend.stream_generate(&self.model, &request, &mut |chunk: &GenerateResponse| {
            let added = acc.push(chunk.clone());
            if !added.is_empty() {
                on_chunk(&added);
            }
        })?;
        Ok(acc.finish())
    }

    pub fn generate_from_text(&self, prompt: &str) -> Result<GenerateResponse> {
        self.generate(build_parts(prompt, &[], &[])?)
    }

    pub fn stream_from_text(&self, prompt: &str, on_chunk: &mut dyn FnMut(&str)) -> Result<GenerateResponse> {
        self.stream(build_parts(prompt, &[], &[])?, on_chunk)
    }

    /// Supported image types are `image/png`, `image/jpeg`, `image/webp`,
    /// `image/heif` and `image/heic`.
    pub fn generate_from_text_and_images(&self, prompt: &str, images: &[PathBuf]) -> Result<GenerateResponse> {
        self.generate(build_parts(prompt, images, &[])?)
    }

    /// Bundle files previously uploaded with [`Gemini::upload`].
    pub fn generate_from_text_and_files(&self, prompt: &str, files: &[FileHandle]) -> Result<GenerateResponse> {
        self.generate(build_parts(prompt, &[], files)?)
    }

    /// Upload a local file. The service deletes it after 48 hours.
    pub fn upload(&self, path: &str, display_name: Option<&str>) -> Result<FileHandle> {
        let path = Path::new(preprocess_input(path));
        let mime_type = mime::require_media_type(path)?;
        if !path.is_file() {
            return Err(CliError::NotFound(path.display().to_string()));
        }
        info!(path = %path.display(), %mime_type, "uploading file");
        self.backend.upload_file(path, display_name, &mime_type)
    }

    /// Upload several files in order, stopping at the first failure.
    pub fn upload_files<S: AsRef<str>>(&self, paths: &[S]) -> Result<Vec<FileHandle>> {
        paths.iter().map(|p| self.upload(p.as_ref(), None)).collect()
    }

    /// Lazily page through uploaded files. Call again to start over.
    pub fn list_files(&self) -> FileListing<'_> {
        FileListing {
            backend: &self.backend,
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
        }
    }

    /// Delete by remote name. The service would delete it after 48 hours
    /// anyway.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        info!(name, "deleting file");
        self.backend.delete_file(preprocess_input(name))
    }

    /// Find a file by display name. A remote name (`files/<id>`) is fetched
    /// directly.
    pub fn get_file(&self, display_name: &str) -> Result<FileHandle> {
        let wanted = preprocess_input(display_name);
        if wanted.starts_with("files/") {
            return self.backend.get_file(wanted);
        }
        for file in self.list_files() {
            let file = file?;
            if file.display_name == wanted {
                return Ok(file);
            }
        }
        Err(CliError::NotFound(format!("File {}", wanted)))
    }

    /// Send a chat message with the running transcript. The transcript only
    /// grows when the service answers with a candidate.
    pub fn send_chat_message(&mut self, message: &str) -> Result<GenerateResponse> {
        let turn = Content::user(vec![Part::text(preprocess_input(message))]);
        let mut contents = self.history.clone();
        contents.push(turn.clone());

        let response = self.backend.generate(&self.model, &self.request(contents))?;

        if let Some(mut reply) = response.candidates.first().and_then(|c| c.content.clone()) {
            reply.role = Some(Role::Model);
            self.history.push(turn);
            self.history.push(reply);
        }
        debug!(turns = self.history.len(), "chat transcript");
        Ok(response)
    }

    /// Send a chat message and return just its text.
    pub fn chat(&mut self, message: &str) -> Result<String> {
        let response = self.send_chat_message(message)?;
        response_text(&response)
    }

    /// Drop the transcript and start a fresh chat.
    pub fn reset_chat(&mut self) {
        self.history.clear();
        info!("chat session reset");
    }
}

/// Trimmed prompt text first, then images, then uploaded files.
pub fn build_parts(prompt: &str, images: &[PathBuf], files: &[FileHandle]) -> Result<Vec<Part>> {
    let mut parts = Vec::with_capacity(1 + images.len() + files.len());
    let prompt = preprocess_input(prompt);
    if !prompt.is_empty() {
        parts.push(Part::text(prompt));
    }
    for image in images {
        parts.push(image_part(image)?);
    }
    parts.extend(files.iter().map(Part::file));
    Ok(parts)
}

/// Read an image into an inline part. Unsupported extensions are rejected
/// before the file is read.
pub fn image_part(path: &Path) -> Result<Part> {
    let mime_type = mime::require_image_type(path)?;
    let bytes = fs::read(path)?;
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(Part::inline(mime_type, data))
}

/// Iterator over every uploaded file, fetching pages as it goes.
pub struct FileListing<'a> {
    backend: &'a dyn GenerativeBackend,
    buffer: VecDeque<FileHandle>,
    next_token: Option<String>,
    exhausted: bool,
}

impl Iterator for FileListing<'_> {
    type Item = Result<FileHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(file) = self.buffer.pop_front() {
                return Some(Ok(file));
            }
            if self.exhausted {
                return None;
            }
            match self.backend.list_files_page(self.next_token.as_deref()) {
                Ok(page) => {
                    self.next_token = page.next_page_token.filter(|t| !t.is_empty());
                    self.exhausted = self.next_token.is_none();
                    self.buffer.extend(page.files);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        models: RefCell<Vec<String>>,
        requests: RefCell<Vec<GenerateRequest>>,
        pages: Vec<FilePage>,
        page_calls: RefCell<usize>,
        reply: Option<String>,
    }

    impl GenerativeBackend for Recorder {
        fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
            self.models.borrow_mut().push(model.to_string());
            self.requests.borrow_mut().push(request.clone());
            match &self.reply {
                Some(text) => Ok(GenerateResponse::from_text(text.clone())),
                None => Err(CliError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
            }
        }

        fn upload_file(&self, path: &Path, display_name: Option<&str>, mime_type: &str) -> Result<FileHandle> {
            Ok(FileHandle {
                name: "files/new".into(),
                display_name: display_name.unwrap_or("upload").into(),
                mime_type: mime_type.into(),
                size_bytes: fs::metadata(path)?.len(),
                uri: "https://example.test/files/new".into(),
                ..Default::default()
            })
        }

        fn list_files_page(&self, _page_token: Option<&str>) -> Result<FilePage> {
            let mut calls = self.page_calls.borrow_mut();
            let page = self.pages.get(*calls).cloned().unwrap_or_default();
            *calls += 1;
            Ok(page)
        }

        fn get_file(&self, name: &str) -> Result<FileHandle> {
            Err(CliError::NotFound(name.into()))
        }

        fn delete_file(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn settings() -> Settings {
        Settings::default().with_api_key("test-key")
    }

    fn handle(name: &str, display: &str) -> FileHandle {
        FileHandle {
            name: name.into(),
            display_name: display.into(),
            mime_type: "audio/mp3".into(),
            uri: format!("https://example.test/{name}"),
            ..Default::default()
        }
    }

    #[test]
    fn construction_requires_key() {
        let result = Gemini::new(&Settings::default(), Recorder::default());
        assert!(matches!(result, Err(CliError::MissingCredential(_))));
    }

    #[test]
    fn requests_go_to_the_configured_model() {
        let backend = Recorder {
            reply: Some("ok".into()),
            ..Default::default()
        };
        let settings = settings().with_model(Some("gemini-1.5-pro".into()));
        let gemini = Gemini::new(&settings, backend).unwrap();
        assert_eq!(gemini.model(), "gemini-1.5-pro");

        gemini.generate_from_text("hi").unwrap();
        assert_eq!(*gemini.backend.models.borrow(), vec!["gemini-1.5-pro".to_string()]);
    }

    #[test]
    fn text_prompt_is_trimmed() {
        let backend = Recorder {
            reply: Some("ok".into()),
            ..Default::default()
        };
        let gemini = Gemini::new(&settings(), backend).unwrap();
        gemini.generate_from_text("  hello \n").unwrap();

        let requests = gemini.backend.requests.borrow();
        assert_eq!(requests[0].contents[0].parts, vec![Part::text("hello")]);
        assert!(requests[0].system_instruction.is_none());
    }

    #[test]
    fn files_follow_prompt() {
        let backend = Recorder {
            reply: Some("ok".into()),
            ..Default::default()
        };
        let gemini = Gemini::new(&settings(), backend).unwrap();
        let files = [handle("files/a", "a"), handle("files/b", "b")];
        gemini.generate_from_text_and_files("compare", &files).unwrap();

        let requests = gemini.backend.requests.borrow();
        let parts = &requests[0].contents[0].parts;
        assert_eq!(parts[0], Part::text("compare"));
        assert_eq!(parts[1].file_data.as_ref().unwrap().file_uri, "https://example.test/files/a");
        assert_eq!(parts[2].file_data.as_ref().unwrap().file_uri, "https://example.test/files/b");
    }

    #[test]
    fn images_are_inlined_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one.png");
        let second = dir.path().join("two.webp");
        fs::write(&first, b"png-bytes").unwrap();
        fs::write(&second, b"webp-bytes").unwrap();

        let parts = build_parts("what", &[first, second], &[]).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].inline_data.as_ref().unwrap().mime_type, "image/png");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&parts[2].inline_data.as_ref().unwrap().data)
            .unwrap();
        assert_eq!(decoded, b"webp-bytes");
    }

    #[test]
    fn unsupported_image_never_reaches_backend() {
        let backend = Recorder {
            reply: Some("ok".into()),
            ..Default::default()
        };
        let gemini = Gemini::new(&settings(), backend).unwrap();
        let err = gemini
            .generate_from_text_and_images("hi", &[PathBuf::from("anim.gif")])
            .unwrap_err();
        assert!(matches!(err, CliError::UnsupportedMediaType(_)));
        assert!(gemini.backend.requests.borrow().is_empty());
    }

    #[test]
    fn chat_keeps_transcript_and_resets() {
        let backend = Recorder {
            reply: Some("pong".into()),
            ..Default::default()
        };
        let mut gemini = Gemini::new(&settings(), backend).unwrap();

        assert_eq!(gemini.chat("ping").unwrap(), "pong");
        gemini.send_chat_message("again").unwrap();
        assert_eq!(gemini.history().len(), 4);
        assert_eq!(gemini.history()[1].role, Some(Role::Model));

        // the second request carried the first exchange
        assert_eq!(gemini.backend.requests.borrow()[1].contents.len(), 3);

        gemini.reset_chat();
        assert!(gemini.history().is_empty());
    }

    #[test]
    fn failed_chat_leaves_transcript_alone() {
        let mut gemini = Gemini::new(&settings(), Recorder::default()).unwrap();
        assert!(gemini.send_chat_message("hello").is_err());
        assert!(gemini.history().is_empty());
    }

    #[test]
    fn listing_walks_pages_lazily() {
        let backend = Recorder {
            pages: vec![
                FilePage {
                    files: vec![handle("files/1", "one")],
                    next_page_token: Some("p2".into()),
                },
                FilePage {
                    files: vec![],
                    next_page_token: Some("p3".into()),
                },
                FilePage {
                    files: vec![handle("files/2", "two")],
                    next_page_token: None,
                },
            ],
            ..Default::default()
        };
        let gemini = Gemini::new(&settings(), backend).unwrap();

        let mut listing = gemini.list_files();
        assert_eq!(listing.next().unwrap().unwrap().name, "files/1");
        assert_eq!(*gemini.backend.page_calls.borrow(), 1);

        let rest: Vec<_> = listing.map(|f| f.unwrap().name).collect();
        assert_eq!(rest, vec!["files/2"]);
        assert_eq!(*gemini.backend.page_calls.borrow(), 3);
    }

    #[test]
    fn get_file_by_display_name() {
        let backend = Recorder {
            pages: vec![FilePage {
                files: vec![handle("files/1", "one"), handle("files/2", "two")],
                next_page_token: None,
            }],
            ..Default::default()
        };
        let gemini = Gemini::new(&settings(), backend).unwrap();
        assert_eq!(gemini.get_file(" two ").unwrap().name, "files/2");
    }

    #[test]
    fn get_file_miss_is_not_found() {
        let gemini = Gemini::new(&settings(), Recorder::default()).unwrap();
        assert!(matches!(gemini.get_file("ghost"), Err(CliError::NotFound(_))));
        assert!(matches!(gemini.get_file("files/ghost"), Err(CliError::NotFound(_))));
    }

    #[test]
    fn upload_checks_type_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.mp3");
        fs::write(&song, b"0123456789").unwrap();

        let gemini = Gemini::new(&settings(), Recorder::default()).unwrap();
        let handle = gemini.upload(song.to_str().unwrap(), Some("tune")).unwrap();
        assert_eq!(handle.display_name, "tune");
        assert_eq!(handle.mime_type, "audio/mp3");
        assert_eq!(handle.size_bytes, 10);

        let missing = dir.path().join("gone.mp3");
        assert!(matches!(
            gemini.upload(missing.to_str().unwrap(), None),
            Err(CliError::NotFound(_))
        ));
        assert!(matches!(
            gemini.upload("notes.pdf", None),
            Err(CliError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn stream_reports_text_chunks() {
        let backend = Recorder {
            reply: Some("whole".into()),
            ..Default::default()
        };
        let gemini = Gemini::new(&settings(), backend)
            .unwrap()
            .with_system_instruction("terse");

        let mut seen = Vec::new();
        let response = gemini.stream_from_text("go", &mut |t| seen.push(t.to_string())).unwrap();
        assert_eq!(seen, vec!["whole"]);
        assert_eq!(response_text(&response).unwrap(), "whole");
        assert!(gemini.backend.requests.borrow()[0].system_instruction.is_some());
    }
}
