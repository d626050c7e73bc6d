// ==============================================================================
// Path Pattern Compiler
// ==============================================================================
//
// Route declarations come in three shapes:
//
// - `/*`                         → wildcard, matches when nothing else does
// - `/static/literal`            → static, exact or segment-prefix match
// - `/user/:id:int:1:9999/edit`  → regex, one typed capture per `:` segment
//
// A `<prefix>/*` declaration is a static prefix route. Every compiled form is
// validated here so malformed routes fail at registration time.

use std::fmt;

use regex::Regex;

use crate::param::{TypeTag, UnknownTypeTag};

// ==============================================================================
// PatternError
// ==============================================================================

/// A route path declaration that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("route path `{0}` must start with `/`")]
    MissingLeadingSlash(String),
    #[error("route path `{path}` has a parameter without a name")]
    EmptyName { path: String },
    #[error("route parameter `{name}` in `{path}` has no type")]
    MissingType { path: String, name: String },
    #[error("route parameter `{name}` in `{path}`: {source}")]
    UnknownType {
        path: String,
        name: String,
        source: UnknownTypeTag,
    },
    #[error("route parameter `{name}` in `{path}` has an invalid bound `{bound}`")]
    BadBound {
        path: String,
        name: String,
        bound: String,
    },
    #[error("route parameter `{name}` in `{path}` has min greater than max")]
    InvertedBounds { path: String, name: String },
    #[error("route parameter `{name}` in `{path}` is `{tag}` and cannot be bounded")]
    BoundsNotAllowed {
        path: String,
        name: String,
        tag: TypeTag,
    },
    #[error("route segment `{segment}` in `{path}` has too many `:` parts")]
    TooManyParts { path: String, segment: String },
    #[error("route parameter `{name}` appears twice in `{path}`")]
    DuplicateName { path: String, name: String },
    #[error("route path `{path}` compiled to an invalid regex: {message}")]
    Regex { path: String, message: String },
}

// ==============================================================================
// PathParam / Bounds
// ==============================================================================

/// Inclusive numeric bounds on a path parameter. Either end may be open.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    const fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// A typed parameter captured from one `/:name:type[:min[:max]]` segment.
#[derive(Clone, Debug, PartialEq)]
pub struct PathParam {
    pub name: String,
    pub tag: TypeTag,
    pub bounds: Option<Bounds>,
}

impl PathParam {
    /// Whether `raw` satisfies the declared bounds. Unbounded parameters
    /// accept anything; coercion degrades them to zero later.
    fn admits(&self, raw: &str) -> bool {
        let Some(bounds) = self.bounds else {
            return true;
        };
        let value = match self.tag {
            TypeTag::Int => raw.parse::<i32>().map(f64::from).ok(),
            TypeTag::Float64 => raw.parse::<f64>().ok(),
            _ => return true,
        };
        value.is_some_and(|v| bounds.contains(v))
    }
}

// ==============================================================================
// PathPattern
// ==============================================================================

/// The compiled form of a route path.
#[derive(Clone, Debug)]
pub enum PathPattern {
    /// A literal path, matched exactly or as a segment prefix.
    Static(String),
    /// A path with typed captures.
    Regex {
        /// Normalised template, e.g. `/user/:id`.
        template: String,
        regex: Regex,
        params: Vec<PathParam>,
    },
    /// `/*`: matches anything, but only when nothing else in the namespace does.
    Wildcard,
}

/// How a pattern matched a request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternMatch {
    Exact,
    Prefix,
    /// Percent-decoded captures in declaration order.
    Captures(Vec<String>),
    Wildcard,
}

impl PathPattern {
    /// Compiles a route declaration.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for malformed declarations: missing leading
    /// `/`, empty names, missing or unknown types, bad or inverted bounds,
    /// bounds on non-numeric types, too many `:` parts, or duplicate names.
    pub fn compile(path: &str) -> Result<Self, PatternError> {
        if path == "/*" {
            return Ok(Self::Wildcard);
        }
        if !path.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(path.to_owned()));
        }
        if !path.contains("/:") {
            let literal = path.strip_suffix("/*").map_or(path, |prefix| {
                if prefix.is_empty() { "/" } else { prefix }
            });
            return Ok(Self::Static(literal.to_owned()));
        }

        let mut template = String::with_capacity(path.len());
        let mut expr = String::with_capacity(path.len() * 2);
        let mut params: Vec<PathParam> = Vec::new();

        expr.push('^');
        for segment in path.split('/').skip(1) {
            template.push('/');
            expr.push('/');
            let Some(decl) = segment.strip_prefix(':') else {
                template.push_str(segment);
                expr.push_str(&regex::escape(segment));
                continue;
            };
            let param = parse_segment(path, segment, decl)?;
            if params.iter().any(|p| p.name == param.name) {
                return Err(PatternError::DuplicateName {
                    path: path.to_owned(),
                    name: param.name,
                });
            }
            template.push(':');
            template.push_str(&param.name);
            expr.push_str("([^/]+)");
            params.push(param);
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|err| PatternError::Regex {
            path: path.to_owned(),
            message: err.to_string(),
        })?;

        Ok(Self::Regex {
            template,
            regex,
            params,
        })
    }

    /// Length used for prefix matching and the longest-match tie-break.
    #[must_use]
    pub fn path_len(&self) -> usize {
        match self {
            Self::Static(literal) => literal.len(),
            Self::Regex { template, .. } => template.len(),
            Self::Wildcard => 0,
        }
    }

    /// The path as shown to users and returned by reverse lookup.
    #[must_use]
    pub fn template(&self) -> &str {
        match self {
            Self::Static(literal) => literal,
            Self::Regex { template, .. } => template,
            Self::Wildcard => "/*",
        }
    }

    /// Path parameters in declaration order; empty for non-regex routes.
    #[must_use]
    pub fn params(&self) -> &[PathParam] {
        match self {
            Self::Regex { params, .. } => params,
            Self::Static(_) | Self::Wildcard => &[],
        }
    }

    /// Tests `path` (raw, not percent-decoded) against this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PatternMatch> {
        match self {
            Self::Wildcard => Some(PatternMatch::Wildcard),
            Self::Static(literal) => {
                if path == literal {
                    return Some(PatternMatch::Exact);
                }
                // The root only ever matches itself.
                let rest = path.strip_prefix(literal.as_str())?;
                let at_boundary =
                    rest.starts_with('/') || (literal.len() > 1 && literal.ends_with('/'));
                at_boundary.then_some(PatternMatch::Prefix)
            }
            Self::Regex { regex, params, .. } => {
                let caps = regex.captures(path)?;
                let mut values = Vec::with_capacity(params.len());
                for (param, group) in params.iter().zip(caps.iter().skip(1)) {
                    let raw = group.map_or("", |m| m.as_str());
                    let decoded = percent_encoding::percent_decode_str(raw)
                        .decode_utf8()
                        .ok()?;
                    if !param.admits(&decoded) {
                        return None;
                    }
                    values.push(decoded.into_owned());
                }
                Some(PatternMatch::Captures(values))
            }
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}

/// Parses `name:type[:min[:max]]` (the part after the leading `:`).
fn parse_segment(path: &str, segment: &str, decl: &str) -> Result<PathParam, PatternError> {
    let parts: Vec<&str> = decl.split(':').collect();
    if parts.len() > 4 {
        return Err(PatternError::TooManyParts {
            path: path.to_owned(),
            segment: segment.to_owned(),
        });
    }

    let name = parts[0].trim();
    if name.is_empty() {
        return Err(PatternError::EmptyName {
            path: path.to_owned(),
        });
    }
    let Some(tag) = parts.get(1).map(|t| t.trim()).filter(|t| !t.is_empty()) else {
        return Err(PatternError::MissingType {
            path: path.to_owned(),
            name: name.to_owned(),
        });
    };
    let tag: TypeTag = tag.parse().map_err(|source| PatternError::UnknownType {
        path: path.to_owned(),
        name: name.to_owned(),
        source,
    })?;

    let bound = |raw: Option<&&str>| -> Result<Option<f64>, PatternError> {
        let Some(raw) = raw.map(|r| r.trim()).filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let parsed = match tag {
            TypeTag::Int => raw.parse::<i32>().ok().map(f64::from),
            _ => raw.parse::<f64>().ok().filter(|f| f.is_finite()),
        };
        parsed.map(Some).ok_or_else(|| PatternError::BadBound {
            path: path.to_owned(),
            name: name.to_owned(),
            bound: raw.to_owned(),
        })
    };

    let bounds = Bounds {
        min: bound(parts.get(2))?,
        max: bound(parts.get(3))?,
    };
    if bounds.is_open() {
        return Ok(PathParam {
            name: name.to_owned(),
            tag,
            bounds: None,
        });
    }
    if !tag.is_boundable() {
        return Err(PatternError::BoundsNotAllowed {
            path: path.to_owned(),
            name: name.to_owned(),
            tag,
        });
    }
    if let (Some(min), Some(max)) = (bounds.min, bounds.max)
        && min > max
    {
        return Err(PatternError::InvertedBounds {
            path: path.to_owned(),
            name: name.to_owned(),
        });
    }

    Ok(PathParam {
        name: name.to_owned(),
        tag,
        bounds: Some(bounds),
    })
}
