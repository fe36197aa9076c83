use axum::extract::{Multipart, multipart::MultipartError};
use indexmap::IndexMap;

use crate::media::Upload;

/// A fully-read `multipart/form-data` body.
///
/// File inputs left empty by the browser arrive as a part with an empty file
/// name and no bytes; those are dropped so that "no file chosen" reads as
/// absent.
#[derive(Debug, Default)]
pub struct MultipartForm {
    texts: IndexMap<String, Vec<String>>,
    files: IndexMap<String, Upload>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(ToString::to_string) else {
                continue;
            };

            match field.file_name().map(ToString::to_string) {
                Some(filename) => {
                    let bytes = field.bytes().await?;
                    if filename.is_empty() || bytes.is_empty() {
                        continue;
                    }
                    form.files.insert(
                        name,
                        Upload { filename, bytes },
                    );
                }
                None => {
                    let text = field.text().await?;
                    form.texts.entry(name).or_default().push(text);
                }
            }
        }

        Ok(form)
    }

    /// The first value of a text field, trimmed.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.texts
            .get(name)
            .and_then(|values| values.first())
            .map(|value| value.trim())
    }

    /// Every value submitted under `name`.
    pub fn texts(&self, name: &str) -> &[String] {
        self.texts.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// HTML checkboxes are only submitted when ticked.
    pub fn checked(&self, name: &str) -> bool {
        self.text(name).is_some_and(|v| v != "false" && v != "off")
    }

    pub fn file(&self, name: &str) -> Option<&Upload> {
        self.files.get(name)
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.shift_remove(name)
    }
}
