// ==============================================================================
// Action signature declarations
// ==============================================================================
//
// Each route is registered with a textual declaration of its action, e.g.
// `Show(id int, form *UserForm)`. The declaration names the parameters (the
// Rust function type does not carry names) so that values can be looked up
// in the path, body and query. It is checked once at registration against
// the action's statically known parameter kinds and the route's path
// parameters.

use std::fmt;

use crate::{
    param::{ParamKind, TypeTag},
    pattern::PathParam,
};

// ==============================================================================
// SignatureError
// ==============================================================================

/// An action declaration that is malformed or disagrees with the action or
/// the route path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed action declaration `{decl}`: {reason}")]
    Malformed { decl: String, reason: &'static str },
    #[error("action `{decl}` declares {declared} parameter(s) but the function takes {actual}")]
    Arity {
        decl: String,
        declared: usize,
        actual: usize,
    },
    #[error("action `{decl}` declares `{name}` as `{declared}` but the function takes `{actual}`")]
    TypeMismatch {
        decl: String,
        name: String,
        declared: String,
        actual: String,
    },
    #[error("action `{decl}` declares `{name}` twice")]
    DuplicateParam { decl: String, name: String },
    #[error("path parameter `{name}` is not declared by action `{decl}`")]
    UndeclaredPathParam { decl: String, name: String },
    #[error("path parameter `{name}` is `{path_tag}` but action `{decl}` declares `{declared}`")]
    PathTypeMismatch {
        decl: String,
        name: String,
        path_tag: TypeTag,
        declared: String,
    },
}

// ==============================================================================
// Declaration parsing
// ==============================================================================

/// A declared parameter type as written.
#[derive(Clone, Debug, PartialEq, Eq)]
enum DeclaredType {
    Scalar(TypeTag),
    /// Struct type name with any leading `*` removed.
    Struct(String),
}

impl DeclaredType {
    fn parse(raw: &str) -> Option<Self> {
        if let Ok(tag) = raw.parse::<TypeTag>() {
            return Some(Self::Scalar(tag));
        }
        let name = raw.strip_prefix('*').unwrap_or(raw);
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'));
        valid.then(|| Self::Struct(name.to_owned()))
    }

    /// Struct names match by suffix on a path boundary, so `forms.UserForm`
    /// and `crate::forms::UserForm` both satisfy `UserForm`.
    fn accepts(&self, kind: ParamKind) -> bool {
        match (self, kind) {
            (Self::Scalar(declared), ParamKind::Scalar(actual)) => *declared == actual,
            (Self::Struct(declared), ParamKind::Struct(actual)) => {
                declared.strip_suffix(actual).is_some_and(|head| {
                    head.is_empty() || head.ends_with('.') || head.ends_with("::")
                })
            }
            _ => false,
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(tag) => tag.fmt(f),
            Self::Struct(name) => f.write_str(name),
        }
    }
}

#[derive(Debug)]
struct Declaration<'a> {
    name: &'a str,
    params: Vec<(&'a str, DeclaredType)>,
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_declaration(decl: &str) -> Result<Declaration<'_>, SignatureError> {
    let malformed = |reason| SignatureError::Malformed {
        decl: decl.to_owned(),
        reason,
    };

    let trimmed = decl.trim();
    let (name, rest) = trimmed
        .split_once('(')
        .ok_or_else(|| malformed("expected `Name(...)`"))?;
    let name = name.trim();
    if !is_ident(name) {
        return Err(malformed("action name is not an identifier"));
    }
    let list = rest
        .strip_suffix(')')
        .ok_or_else(|| malformed("missing closing `)`"))?;
    if list.contains(['(', ')']) {
        return Err(malformed("unbalanced parentheses"));
    }

    let mut params = Vec::new();
    if list.trim().is_empty() {
        return Ok(Declaration { name, params });
    }
    for item in list.split(',') {
        let mut words = item.split_whitespace();
        let (Some(param), Some(ty), None) = (words.next(), words.next(), words.next()) else {
            return Err(malformed("each parameter must be `name type`"));
        };
        if !is_ident(param) {
            return Err(malformed("parameter name is not an identifier"));
        }
        let ty = DeclaredType::parse(ty).ok_or_else(|| malformed("invalid parameter type"))?;
        params.push((param, ty));
    }
    Ok(Declaration { name, params })
}

// ==============================================================================
// ParamSpec / Signature
// ==============================================================================

/// One formal parameter of a registered action, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Index into the route's path captures, if the value comes from the path.
    pub path_index: Option<usize>,
}

/// A validated action declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// The action name, used for reverse lookup.
    pub action: String,
    pub specs: Vec<ParamSpec>,
}

impl Signature {
    /// Parses `decl` and checks it against the action's parameter `kinds`
    /// and the route's `path_params`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] if the declaration is malformed, its arity
    /// or types disagree with `kinds`, a name is declared twice, or a path
    /// parameter is undeclared or declared with a different type.
    pub fn validate(
        decl: &str,
        kinds: &[ParamKind],
        path_params: &[PathParam],
    ) -> Result<Self, SignatureError> {
        let parsed = parse_declaration(decl)?;

        if parsed.params.len() != kinds.len() {
            return Err(SignatureError::Arity {
                decl: decl.to_owned(),
                declared: parsed.params.len(),
                actual: kinds.len(),
            });
        }

        for (i, (name, ty)) in parsed.params.iter().enumerate() {
            if parsed.params[..i].iter().any(|(other, _)| other == name) {
                return Err(SignatureError::DuplicateParam {
                    decl: decl.to_owned(),
                    name: (*name).to_owned(),
                });
            }
            if !ty.accepts(kinds[i]) {
                return Err(SignatureError::TypeMismatch {
                    decl: decl.to_owned(),
                    name: (*name).to_owned(),
                    declared: ty.to_string(),
                    actual: kinds[i].to_string(),
                });
            }
        }

        for param in path_params {
            let Some((_, declared)) = parsed.params.iter().find(|(name, _)| *name == param.name)
            else {
                return Err(SignatureError::UndeclaredPathParam {
                    decl: decl.to_owned(),
                    name: param.name.clone(),
                });
            };
            if *declared != DeclaredType::Scalar(param.tag) {
                return Err(SignatureError::PathTypeMismatch {
                    decl: decl.to_owned(),
                    name: param.name.clone(),
                    path_tag: param.tag,
                    declared: declared.to_string(),
                });
            }
        }

        let specs = parsed
            .params
            .iter()
            .zip(kinds)
            .map(|((name, _), kind)| ParamSpec {
                name: (*name).to_owned(),
                kind: *kind,
                path_index: path_params.iter().position(|p| p.name == *name),
            })
            .collect();

        Ok(Self {
            action: parsed.name.to_owned(),
            specs,
        })
    }
}
