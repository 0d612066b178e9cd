//! Wire types exchanged with the notes API.
//!
//! Payloads are passed through as the server sends them; no business
//! validation happens on this side.

use serde::{Deserialize, Serialize};

/// Body returned by the login and refresh endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
}

/// An ICD diagnosis code as returned by `GET /diagnosis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisCode {
    pub chapter_code: String,
    pub category_code: String,
    pub subcategory_code: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DiagnosisCode {
    /// Short code form, e.g. `A01` or `A01.4`. Subcategory `X` means "none".
    pub fn code(&self) -> String {
        if self.subcategory_code.is_empty() || self.subcategory_code.eq_ignore_ascii_case("x") {
            format!("{}{}", self.chapter_code, self.category_code)
        } else {
            format!("{}{}.{}", self.chapter_code, self.category_code, self.subcategory_code)
        }
    }

    pub fn code_with_title(&self) -> String {
        match self.title.as_deref() {
            Some(title) => format!("{} {}", self.code(), title),
            None => self.code(),
        }
    }
}

/// Reference to a diagnosis code attached to a consultation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRef {
    pub chapter_code: String,
    pub category_code: String,
    pub subcategory_code: String,
}

/// Body of `POST /consultation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConsultation {
    pub email: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub codes: Vec<CodeRef>,
}

/// A stored consultation note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    pub note_id: i64,
    pub email: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub codes: Vec<DiagnosisCode>,
}
