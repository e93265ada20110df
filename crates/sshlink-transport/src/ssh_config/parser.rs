//! Line parser for `ssh_config(5)` files

use crate::TransportError;
use tracing::debug;

/// Which hosts a block applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Criteria {
    /// Options before the first `Host`/`Match` line
    Global,
    /// `Host pattern...`
    Host(Vec<String>),
    /// `Match criterion...`
    Match(Vec<MatchCriterion>),
}

/// Supported `Match` criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchKind {
    All,
    Host,
    OriginalHost,
    User,
    LocalUser,
}

/// One `Match` criterion with its pattern list
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MatchCriterion {
    pub kind: MatchKind,
    pub negated: bool,
    /// Comma-separated pattern list, empty for `all`
    pub patterns: String,
}

/// A single `Keyword value` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigOption {
    /// Lowercased keyword
    pub keyword: String,
    pub value: String,
    pub line: usize,
}

/// A `Host`/`Match` block and the options under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub criteria: Criteria,
    pub options: Vec<ConfigOption>,
}

/// Parse config file content into blocks, in file order
pub(crate) fn parse_blocks(content: &str) -> Result<Vec<Block>, TransportError> {
    let mut blocks = vec![Block {
        criteria: Criteria::Global,
        options: Vec::new(),
    }];

    for (index, raw) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (keyword, value) = split_keyword(line);
        if keyword.is_empty() {
            continue;
        }

        match keyword.as_str() {
            "host" => {
                let patterns = parse_host_patterns(value, line_number)?;
                blocks.push(Block {
                    criteria: Criteria::Host(patterns),
                    options: Vec::new(),
                });
            }
            "match" => {
                let criteria = parse_match_criteria(value, line_number)?;
                blocks.push(Block {
                    criteria: Criteria::Match(criteria),
                    options: Vec::new(),
                });
            }
            "include" => {
                debug!("Skipping Include directive at line {}", line_number);
            }
            _ => {
                if value.is_empty() {
                    return Err(TransportError::Parse {
                        line: line_number,
                        message: format!("Missing value for '{}'", keyword),
                    });
                }
                // The first block always exists, so last_mut never fails.
                if let Some(block) = blocks.last_mut() {
                    block.options.push(ConfigOption {
                        keyword,
                        value: unquote(value).to_string(),
                        line: line_number,
                    });
                }
            }
        }
    }

    Ok(blocks)
}

/// Split a line into its lowercased keyword and the raw remainder.
///
/// Accepts `Keyword value`, `Keyword=value` and `Keyword = value`.
fn split_keyword(line: &str) -> (String, &str) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let keyword = line[..end].to_ascii_lowercase();

    let rest = line[end..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    (keyword, rest)
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn parse_host_patterns(value: &str, line: usize) -> Result<Vec<String>, TransportError> {
    let patterns: Vec<String> = value
        .split_whitespace()
        .map(|p| unquote(p).to_string())
        .collect();

    if patterns.is_empty() {
        return Err(TransportError::Parse {
            line,
            message: "Host directive requires at least one pattern".to_string(),
        });
    }
    Ok(patterns)
}

fn parse_match_criteria(value: &str, line: usize) -> Result<Vec<MatchCriterion>, TransportError> {
    let mut tokens = value.split_whitespace();
    let mut criteria = Vec::new();

    while let Some(token) = tokens.next() {
        let (negated, name) = match token.strip_prefix('!') {
            Some(name) => (true, name),
            None => (false, token),
        };

        let kind = match name.to_ascii_lowercase().as_str() {
            "all" => MatchKind::All,
            "host" => MatchKind::Host,
            "originalhost" => MatchKind::OriginalHost,
            "user" => MatchKind::User,
            "localuser" => MatchKind::LocalUser,
            other => {
                return Err(TransportError::Parse {
                    line,
                    message: format!("Unsupported Match criterion '{}'", other),
                })
            }
        };

        let patterns = if kind == MatchKind::All {
            String::new()
        } else {
            tokens
                .next()
                .map(|p| unquote(p).to_string())
                .ok_or_else(|| TransportError::Parse {
                    line,
                    message: format!("Match criterion '{}' requires an argument", name),
                })?
        };

        criteria.push(MatchCriterion {
            kind,
            negated,
            patterns,
        });
    }

    if criteria.is_empty() {
        return Err(TransportError::Parse {
            line,
            message: "Match directive requires at least one criterion".to_string(),
        });
    }
    Ok(criteria)
}
