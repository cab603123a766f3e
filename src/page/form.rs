//! HTML forms and their submission encoding.

use rand::Rng;
use reqwest::Method;
use url::Url;
use url::form_urlencoded;

use super::ElementNotFound;

/// File attached to a `<input type="file">` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl FileUpload {
    #[must_use]
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Hidden,
    Password,
    Textarea,
    Select,
    Checkbox { checked: bool },
    Radio { checked: bool },
    File(Option<FileUpload>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
    /// Option values for selects.
    pub options: Vec<String>,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind,
            options: Vec::new(),
        }
    }

    /// Whether the field contributes to a submission.
    fn is_successful(&self) -> bool {
        match self.kind {
            FieldKind::Checkbox { checked } | FieldKind::Radio { checked } => checked,
            _ => true,
        }
    }
}

/// A submit control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub name: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub name: Option<String>,
    pub id: Option<String>,
    /// `action` attribute, unresolved. Absent means the page URI.
    pub action: Option<String>,
    /// Uppercased method, `GET` by default.
    pub method: String,
    pub enctype: String,
    pub fields: Vec<Field>,
    pub buttons: Vec<Button>,
}

/// A request ready to be sent for a form submission.
#[derive(Debug, Clone)]
pub struct FormSubmission {
    pub method: Method,
    pub uri: Url,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl Form {
    /// First field called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// # Errors
    ///
    /// Returns [`ElementNotFound`] when no field is called `name`.
    pub fn field_with_required(&self, name: &str) -> Result<&Field, ElementNotFound> {
        self.field(name)
            .ok_or_else(|| ElementNotFound::new("field", format!("name={name:?}")))
    }

    /// Sets a field's value.
    ///
    /// For checkboxes and radios this checks the control whose value equals
    /// `value` (unchecking the other radios of the group).
    ///
    /// # Errors
    ///
    /// Returns [`ElementNotFound`] when no field is called `name`, or no
    /// checkbox/radio in that group carries `value`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ElementNotFound> {
        let not_found = || ElementNotFound::new("field", format!("name={name:?} value={value:?}"));
        let index = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(not_found)?;

        match self.fields[index].kind {
            FieldKind::Checkbox { .. } | FieldKind::Radio { .. } => {
                let target = self
                    .fields
                    .iter()
                    .position(|f| f.name == name && f.value == value)
                    .ok_or_else(not_found)?;
                for (i, field) in self.fields.iter_mut().enumerate() {
                    match &mut field.kind {
                        FieldKind::Checkbox { checked } if i == target => *checked = true,
                        FieldKind::Radio { checked } if field.name == name => *checked = i == target,
                        _ => {}
                    }
                }
            }
            _ => self.fields[index].value = value.to_string(),
        }
        Ok(())
    }

    /// Attaches a file to a file input.
    ///
    /// # Errors
    ///
    /// Returns [`ElementNotFound`] when no file input is called `name`.
    pub fn set_file(&mut self, name: &str, upload: FileUpload) -> Result<(), ElementNotFound> {
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name == name && matches!(f.kind, FieldKind::File(_)))
            .ok_or_else(|| ElementNotFound::new("file field", format!("name={name:?}")))?;
        field.value = upload.file_name.clone();
        field.kind = FieldKind::File(Some(upload));
        Ok(())
    }

    /// Name/value pairs for a submission, file inputs rendered by file name.
    #[must_use]
    pub fn pairs(&self, button: Option<&Button>) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .fields
            .iter()
            .filter(|f| f.is_successful())
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect();
        if let Some(Button {
            name: Some(name),
            value,
        }) = button
        {
            pairs.push((name.clone(), value.clone()));
        }
        pairs
    }

    /// Builds the submission request relative to `base`.
    ///
    /// GET forms replace the action's query; other methods carry an
    /// urlencoded or `multipart/form-data` body according to `enctype`.
    ///
    /// # Errors
    ///
    /// Returns a parse error when the action does not resolve against `base`.
    pub fn build_request(
        &self,
        base: &Url,
        button: Option<&Button>,
    ) -> Result<FormSubmission, url::ParseError> {
        let mut uri = match self.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => base.join(action)?,
            _ => base.clone(),
        };
        uri.set_fragment(None);
        let method = Method::from_bytes(self.method.as_bytes()).unwrap_or(Method::GET);

        if method == Method::GET || method == Method::HEAD {
            let query = encode_pairs(&self.pairs(button));
            uri.set_query((!query.is_empty()).then_some(query.as_str()));
            return Ok(FormSubmission {
                method,
                uri,
                body: None,
                content_type: None,
            });
        }

        let (body, content_type) = if self.enctype == "multipart/form-data" {
            let boundary = format!("----webagent{:016x}", rand::thread_rng().r#gen::<u64>());
            let body = self.multipart_body(&boundary, button);
            (body, format!("multipart/form-data; boundary={boundary}"))
        } else {
            (
                encode_pairs(&self.pairs(button)).into_bytes(),
                "application/x-www-form-urlencoded".to_string(),
            )
        };
        Ok(FormSubmission {
            method,
            uri,
            body: Some(body),
            content_type: Some(content_type),
        })
    }

    fn multipart_body(&self, boundary: &str, button: Option<&Button>) -> Vec<u8> {
        let mut body = Vec::new();
        for field in self.fields.iter().filter(|f| f.is_successful()) {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match &field.kind {
                FieldKind::File(upload) => {
                    let (file_name, mime, data) = upload.as_ref().map_or(
                        ("", "application/octet-stream", &[][..]),
                        |u| (u.file_name.as_str(), u.mime_type.as_str(), u.data.as_slice()),
                    );
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {mime}\r\n\r\n",
                            escape_quotes(&field.name),
                            escape_quotes(file_name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
                _ => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                            escape_quotes(&field.name),
                            field.value
                        )
                        .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        if let Some(Button {
            name: Some(name),
            value,
        }) = button
        {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }
}

/// `application/x-www-form-urlencoded` serialization.
#[must_use]
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "%22")
}
