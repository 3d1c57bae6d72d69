//! multipart/form-data parsing
//!
//! Buffers are small enough (bounded by the upload limit) that the whole
//! body is parsed in memory.

use crate::error::{FileCryptError, Result};

/// One part of a form body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    /// Field name from `Content-Disposition`
    pub name: String,
    /// Client file name, present for file fields
    pub filename: Option<String>,
    /// Raw part body
    pub data: Vec<u8>,
}

/// A parsed form body
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<FormPart>,
}

impl MultipartForm {
    /// Parse `body` using the boundary named in `content_type`
    pub fn parse(content_type: &str, body: &[u8]) -> Result<Self> {
        let boundary = boundary(content_type)?;
        let delimiter = format!("--{}", boundary).into_bytes();
        let separator = format!("\r\n--{}", boundary).into_bytes();

        let mut pos = find(body, &delimiter, 0)
            .ok_or_else(|| FileCryptError::invalid("multipart body has no opening boundary"))?
            + delimiter.len();

        let mut parts = Vec::new();
        loop {
            let rest = &body[pos..];
            if rest.starts_with(b"--") {
                break;
            }
            if !rest.starts_with(b"\r\n") {
                return Err(FileCryptError::invalid("malformed multipart boundary line"));
            }
            pos += 2;

            let header_end = find(body, b"\r\n\r\n", pos)
                .ok_or_else(|| FileCryptError::invalid("multipart part without header terminator"))?;
            let headers = std::str::from_utf8(&body[pos..header_end])
                .map_err(|_| FileCryptError::invalid("multipart headers are not UTF-8"))?;
            let data_start = header_end + 4;

            let data_end = find(body, &separator, data_start)
                .ok_or_else(|| FileCryptError::invalid("multipart body has no closing boundary"))?;

            let (name, filename) = parse_part_headers(headers)?;
            parts.push(FormPart {
                name,
                filename,
                data: body[data_start..data_end].to_vec(),
            });
            pos = data_end + separator.len();
        }

        Ok(Self { parts })
    }

    /// All parts in body order
    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// First part named `name`
    pub fn part(&self, name: &str) -> Option<&FormPart> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Text value of a required field
    pub fn text(&self, name: &str) -> Result<String> {
        let part = self
            .part(name)
            .ok_or_else(|| FileCryptError::invalid(format!("missing form field '{}'", name)))?;
        String::from_utf8(part.data.clone())
            .map_err(|_| FileCryptError::invalid(format!("form field '{}' is not UTF-8", name)))
    }

    /// Required file field, returned as (file name, contents)
    pub fn file(&self, name: &str) -> Result<(String, Vec<u8>)> {
        let part = self
            .part(name)
            .ok_or_else(|| FileCryptError::invalid(format!("missing file field '{}'", name)))?;
        let filename = part
            .filename
            .clone()
            .ok_or_else(|| FileCryptError::invalid(format!("field '{}' is not a file", name)))?;
        Ok((filename, part.data.clone()))
    }
}

/// Extract the boundary parameter of a multipart content type
pub fn boundary(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let media = params.next().unwrap_or("").trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return Err(FileCryptError::invalid(format!(
            "expected multipart/form-data, got '{}'",
            media
        )));
    }

    params
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty() && b.len() <= 70)
        .ok_or_else(|| FileCryptError::invalid("multipart content type without boundary"))
}

fn parse_part_headers(headers: &str) -> Result<(String, Option<String>)> {
    let disposition = headers
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-disposition"))
        .map(|(_, v)| v.trim())
        .ok_or_else(|| FileCryptError::invalid("multipart part without Content-Disposition"))?;

    let mut name = None;
    let mut filename = None;
    for param in disposition.split(';').skip(1) {
        if let Some((key, value)) = param.trim().split_once('=') {
            let value = unquote(value.trim());
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(value),
                "filename" => filename = Some(value),
                _ => {}
            }
        }
    }

    let name = name.ok_or_else(|| FileCryptError::invalid("multipart part without a name"))?;
    Ok((name, filename))
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_string(),
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=XyZ";

    fn body(file: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"--XyZ\r\nContent-Disposition: form-data; name=\"algorithm\"\r\n\r\naes256\r\n");
        b.extend_from_slice(b"--XyZ\r\nContent-Disposition: form-data; name=\"key\"\r\n\r\ntest123\r\n");
        b.extend_from_slice(
            b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"my notes.txt\"\r\n\
              Content-Type: application/octet-stream\r\n\r\n",
        );
        b.extend_from_slice(file);
        b.extend_from_slice(b"\r\n--XyZ--\r\n");
        b
    }

    #[test]
    fn test_parse_fields_and_file() {
        let payload = b"line one\r\n--Xy not a boundary\r\n\x00\xff";
        let form = MultipartForm::parse(CT, &body(payload)).unwrap();

        assert_eq!(form.parts().len(), 3);
        assert_eq!(form.text("algorithm").unwrap(), "aes256");
        assert_eq!(form.text("key").unwrap(), "test123");
        let (name, data) = form.file("file").unwrap();
        assert_eq!(name, "my notes.txt");
        assert_eq!(data, payload);
    }

    #[test]
    fn test_empty_file() {
        let form = MultipartForm::parse(CT, &body(b"")).unwrap();
        assert!(form.file("file").unwrap().1.is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let form = MultipartForm::parse(CT, &body(b"x")).unwrap();
        assert!(matches!(form.text("nope"), Err(FileCryptError::InvalidInput(_))));
        assert!(form.file("key").is_err());
    }

    #[test]
    fn test_boundary() {
        assert_eq!(boundary("multipart/form-data; boundary=\"a b\"").unwrap(), "a b");
        assert_eq!(boundary("Multipart/Form-Data;charset=utf-8; BOUNDARY=z").unwrap(), "z");
        assert!(boundary("application/json").is_err());
        assert!(boundary("multipart/form-data").is_err());
    }

    #[test]
    fn test_truncated_body() {
        let mut b = body(b"data");
        b.truncate(b.len() - 10);
        assert!(MultipartForm::parse(CT, &b).is_err());
        assert!(MultipartForm::parse(CT, b"no boundary here").is_err());
    }
}
