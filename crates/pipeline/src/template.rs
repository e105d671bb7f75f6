//! Instruction templates with named `{field}` placeholders.
//!
//! `{{` and `}}` render as literal braces. Placeholders are checked twice:
//! against the fields a stage declares when the template is parsed, and
//! against the bound values before anything is rendered.

use std::collections::BTreeMap;

use crate::error::TemplateError;
use crate::victim::VictimProfile;

pub mod fields {
    pub const TRANSCRIPT_TEXT: &str = "transcript_text";
    pub const MONITOR_RESULT: &str = "monitor_result";
    pub const PROFILE_RESULT: &str = "profile_result";
    pub const VICTIM_NAME: &str = "victim_name";
    pub const VICTIM_AGE: &str = "victim_age";
    pub const VICTIM_TAG: &str = "victim_tag";
    pub const VICTIM_WEAKNESS: &str = "victim_weakness";
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    pieces: Vec<Piece>,
}

impl Template {
    pub fn parse(name: &str, source: &str, declared: &[&str]) -> Result<Self, TemplateError> {
        let malformed = |offset| TemplateError::Malformed {
            template: name.to_string(),
            offset,
        };

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        field.push(c);
                    }
                    let valid = !field.is_empty()
                        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                    if !closed || !valid {
                        return Err(malformed(offset));
                    }
                    if !declared.contains(&field.as_str()) {
                        return Err(TemplateError::UndeclaredField {
                            template: name.to_string(),
                            field,
                        });
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Field(field));
                }
                '}' => return Err(malformed(offset)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            name: name.to_string(),
            pieces,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Field(field) => Some(field.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Render with every placeholder bound, or fail before producing any text.
    pub fn render(&self, context: &TemplateContext) -> Result<String, TemplateError> {
        if let Some(missing) = self.fields().find(|field| context.get(field).is_none()) {
            return Err(TemplateError::MissingField {
                template: self.name.clone(),
                field: missing.to_string(),
            });
        }

        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Field(field) => out.push_str(context.get(field).unwrap_or_default()),
            }
        }
        Ok(out)
    }
}

/// Values bound for rendering, keyed by the names in [`fields`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: BTreeMap<&'static str, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, field: &'static str, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &'static str, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn bind_victim(self, victim: &VictimProfile) -> Self {
        self.bind(fields::VICTIM_NAME, victim.name.clone())
            .bind(fields::VICTIM_AGE, victim.age.clone())
            .bind(fields::VICTIM_TAG, victim.tag.clone())
            .bind(fields::VICTIM_WEAKNESS, victim.weakness.clone())
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }
}
