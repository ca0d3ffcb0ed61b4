//! Path Expressions
//!
//! Compiled string templates such as `$document_root$uri.lua` used to
//! resolve the target script and the path-info of a request.

use http::{HeaderMap, Method};

use crate::error::ConfigError;

// == Variables ==
/// Request state an [`Expression`] is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Variables<'a> {
    /// Current (possibly redirected) path
    pub uri: &'a str,
    pub args: Option<&'a str>,
    /// Path and query of the request as the client sent it
    pub request_uri: &'a str,
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    pub document_root: &'a str,
    /// Regex captures of the matched location, `$0` being the whole match
    pub captures: &'a [Option<String>],
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Variable {
    Uri,
    Args,
    RequestUri,
    RequestMethod,
    Host,
    DocumentRoot,
    /// Request header, name lower-cased with `_` mapped to `-`
    Header(String),
    Capture(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Variable),
}

// == Expression ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    segments: Vec<Segment>,
}

impl Expression {
    // == Compile ==
    /// Parses `source`; `directive` names the configuration key in errors.
    pub fn compile(directive: &'static str, source: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Expression {
            directive,
            source_text: source.to_string(),
            reason,
        };

        if source.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let name = match chars.peek() {
                Some((_, '{')) => {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(invalid("missing closing \"}\"".to_string())),
                        }
                    }
                    name
                }
                Some((_, d)) if d.is_ascii_digit() => {
                    let d = *d;
                    chars.next();
                    d.to_string()
                }
                _ => {
                    let mut name = String::new();
                    while let Some((_, c)) = chars.peek() {
                        if c.is_ascii_alphanumeric() || *c == '_' {
                            name.push(*c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    name
                }
            };

            if name.is_empty() {
                return Err(invalid("variable name expected after \"$\"".to_string()));
            }
            let variable = Variable::parse(&name)
                .ok_or_else(|| invalid(format!("unknown variable \"{name}\"")))?;

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Var(variable));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    // == Evaluate ==
    /// Expands the expression; unset variables expand to nothing.
    pub fn evaluate(&self, vars: &Variables<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(variable) => variable.append(vars, &mut out),
            }
        }
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Highest capture index referenced, if any.
    pub fn max_capture(&self) -> Option<usize> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Var(Variable::Capture(n)) => Some(*n),
                _ => None,
            })
            .max()
    }
}

impl Variable {
    fn parse(name: &str) -> Option<Self> {
        if let Ok(index) = name.parse::<usize>() {
            return (index <= 9).then_some(Variable::Capture(index));
        }
        let variable = match name {
            "uri" | "document_uri" => Variable::Uri,
            "args" | "query_string" => Variable::Args,
            "request_uri" => Variable::RequestUri,
            "request_method" => Variable::RequestMethod,
            "host" => Variable::Host,
            "document_root" => Variable::DocumentRoot,
            _ => {
                let header = name.strip_prefix("http_").filter(|h| !h.is_empty())?;
                Variable::Header(header.to_ascii_lowercase().replace('_', "-"))
            }
        };
        Some(variable)
    }

    fn append(&self, vars: &Variables<'_>, out: &mut String) {
        match self {
            Variable::Uri => out.push_str(vars.uri),
            Variable::Args => out.push_str(vars.args.unwrap_or_default()),
            Variable::RequestUri => out.push_str(vars.request_uri),
            Variable::RequestMethod => out.push_str(vars.method.as_str()),
            Variable::DocumentRoot => out.push_str(vars.document_root),
            Variable::Host => {
                if let Some(host) = vars.headers.get(http::header::HOST).and_then(|h| h.to_str().ok()) {
                    let host = host.rsplit_once(':').map_or(host, |(name, _)| name);
                    out.push_str(&host.to_ascii_lowercase());
                }
            }
            Variable::Header(name) => {
                let values: Vec<&str> = vars
                    .headers
                    .get_all(name.as_str())
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .collect();
                out.push_str(&values.join(", "));
            }
            Variable::Capture(index) => {
                if let Some(Some(capture)) = vars.captures.get(*index) {
                    out.push_str(capture);
                }
            }
        }
    }
}
