//! file: core/src/parser.rs
//! description: pipeline expression parsing.
//!
//! The pest grammar (`grammar.pest`, top-level rule `Rule::pipeline`)
//! produces the token tree; this module lowers it into `Pipeline` values and
//! runs structural validation. Lowering is where `--key value` pairs up:
//! an option followed by a non-option token consumes it as its value,
//! otherwise it is a boolean flag.

use crate::error::ParseError;
use crate::pipeline::{Pipeline, PipelineStage, StageElement};
use crate::types::CoreOptions;
use pest::Parser;
use pest_derive::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct PipelineGrammar;

/// Parse and validate a pipeline expression against a source path.
pub fn parse_pipeline(
    expr: &str,
    source: impl Into<PathBuf>,
    core_options: CoreOptions,
) -> Result<Pipeline, ParseError> {
    let mut pipeline = parse_expression(expr)?;
    pipeline.source = source.into();
    pipeline.core_options = core_options;
    pipeline.validate()?;
    Ok(pipeline)
}

/// Parse the expression alone, without validation or source binding.
pub fn parse_expression(expr: &str) -> Result<Pipeline, ParseError> {
    if expr.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut parsed = PipelineGrammar::parse(Rule::pipeline, expr)
        .map_err(|e| ParseError::Syntax(e.to_string()))?;
    let root = parsed
        .next()
        .ok_or_else(|| ParseError::Syntax("empty parse tree".to_string()))?;

    let mut stages = Vec::new();
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::stage => stages.push(lower_stage(pair)),
            Rule::EOI => {}
            _ => {}
        }
    }

    Ok(Pipeline { stages, ..Default::default() })
}

/// True when an argv tail uses pipeline syntax rather than the plain
/// single-conversion form.
pub fn is_pipeline_syntax(args: &[String]) -> bool {
    args.iter().any(|arg| arg == "|" || arg.contains('|'))
}

fn lower_stage(pair: pest::iterators::Pair<Rule>) -> PipelineStage {
    let elements = pair.into_inner().map(lower_element).collect();
    PipelineStage::new(elements)
}

enum Token {
    Option { key: String, value: Option<String>, text: String },
    Bare { value: String, text: String },
}

fn lower_element(pair: pest::iterators::Pair<Rule>) -> StageElement {
    let mut element = StageElement::default();
    let mut tokens: Vec<Token> = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::spec => lower_spec(inner, &mut element),
            Rule::token => {
                if let Some(token) = lower_token(inner) {
                    tokens.push(token);
                }
            }
            _ => {}
        }
    }

    apply_tokens(&mut element, tokens);
    element
}

fn lower_spec(pair: pest::iterators::Pair<Rule>, element: &mut StageElement) {
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::target => element.target = inner.as_str().to_string(),
            Rule::extension => element.extension = Some(inner.as_str().to_string()),
            Rule::plugin_ref => element.plugin = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
}

fn lower_token(pair: pest::iterators::Pair<Rule>) -> Option<Token> {
    let inner = pair.into_inner().next()?;
    let text = inner.as_str().to_string();
    match inner.as_rule() {
        Rule::option => {
            let mut key = String::new();
            let mut value = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::option_key => key = part.as_str().to_string(),
                    Rule::option_value => value = Some(unquote(part.as_str())),
                    _ => {}
                }
            }
            Some(Token::Option { key, value, text })
        }
        Rule::bare => Some(Token::Bare { value: unquote(inner.as_str()), text }),
        _ => None,
    }
}

/// Pair options with their values and record everything in raw form,
/// preserving declaration order.
fn apply_tokens(element: &mut StageElement, tokens: Vec<Token>) {
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        match token {
            Token::Option { key, value: Some(value), text } => {
                element.options.insert(key, value);
                element.raw_options.push(text);
            }
            Token::Option { key, value: None, text } => {
                element.raw_options.push(text);
                // A following non-option token is this option's value.
                if matches!(iter.peek(), Some(Token::Bare { .. })) {
                    if let Some(Token::Bare { value, text }) = iter.next() {
                        element.options.insert(key, value);
                        element.raw_options.push(text);
                    }
                } else {
                    element.options.insert(key, "true".to_string());
                }
            }
            Token::Bare { text, .. } => {
                // Stray positional token: forwarded raw, not parsed.
                element.raw_options.push(text);
            }
        }
    }
}

/// Strip one layer of matching quotes and resolve backslash escapes.
fn unquote(text: &str) -> String {
    let inner = if text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
    {
        &text[1..text.len() - 1]
    } else {
        text
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_element_with_options() {
        let p = parse_expression("jpg --quality 85 --progressive").unwrap();
        assert_eq!(p.stages.len(), 1);
        let element = &p.stages[0].elements[0];
        assert_eq!(element.target, "jpg");
        assert_eq!(element.options.get("quality").map(String::as_str), Some("85"));
        assert_eq!(element.options.get("progressive").map(String::as_str), Some("true"));
        assert_eq!(element.raw_options, vec!["--quality", "85", "--progressive"]);
    }

    #[test]
    fn stages_and_parallel_elements() {
        let p = parse_expression("tee | jpg, png --compression 9 | collect").unwrap();
        assert_eq!(p.stages.len(), 3);
        assert!(p.stages[0].has_tee());
        assert_eq!(p.stages[1].cardinality(), 2);
        assert!(p.stages[2].has_collect());
    }

    #[test]
    fn plugin_hint_and_extension() {
        let p = parse_expression("thumb.png@image-fast/vips --width 64").unwrap();
        let element = &p.stages[0].elements[0];
        assert_eq!(element.target, "thumb");
        assert_eq!(element.extension.as_deref(), Some("png"));
        assert_eq!(element.plugin.as_deref(), Some("image-fast/vips"));
    }

    #[test]
    fn quoted_values_are_dequoted_but_raw_preserved() {
        let p = parse_expression(r#"pdf --title "Annual Report" --author='J. Doe'"#).unwrap();
        let element = &p.stages[0].elements[0];
        assert_eq!(element.options.get("title").map(String::as_str), Some("Annual Report"));
        assert_eq!(element.options.get("author").map(String::as_str), Some("J. Doe"));
        assert!(element.raw_options.contains(&"\"Annual Report\"".to_string()));
    }

    #[test]
    fn key_equals_value_form() {
        let p = parse_expression("jpg --quality=90 --mode=\"fast lane\"").unwrap();
        let element = &p.stages[0].elements[0];
        assert_eq!(element.options.get("quality").map(String::as_str), Some("90"));
        assert_eq!(element.options.get("mode").map(String::as_str), Some("fast lane"));
    }

    #[test]
    fn escaped_characters_survive() {
        let p = parse_expression(r#"txt --note "line\"quote""#).unwrap();
        let element = &p.stages[0].elements[0];
        assert_eq!(element.options.get("note").map(String::as_str), Some("line\"quote"));
    }

    #[test]
    fn garbage_is_a_syntax_error() {
        assert!(parse_expression("| jpg").is_err());
        assert!(parse_expression("jpg |").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("jpg, | png").is_err());
    }

    #[test]
    fn parse_display_reparse_is_equivalent() {
        let exprs = [
            "jpg --quality 85",
            "tee | jpg, png | collect",
            "thumb.png@vips --width 64 | clipboard --save",
            r#"pdf --title "Annual Report" | _"#,
        ];
        for expr in exprs {
            let first = parse_expression(expr).unwrap();
            let rendered = first.to_string();
            let second = parse_expression(&rendered).unwrap();
            assert_eq!(first.stages, second.stages, "round-trip of {:?}", expr);
        }
    }

    #[test]
    fn validation_runs_inside_parse_pipeline() {
        let err =
            parse_pipeline("jpg | tee", "photo.heic", CoreOptions::default()).unwrap_err();
        assert!(err.to_string().contains("last stage"));
    }

    #[test]
    fn pipeline_syntax_detection() {
        let args: Vec<String> =
            ["photo.heic", "|", "jpg"].iter().map(|s| s.to_string()).collect();
        assert!(is_pipeline_syntax(&args));
        let plain: Vec<String> = ["photo.heic", "jpg"].iter().map(|s| s.to_string()).collect();
        assert!(!is_pipeline_syntax(&plain));
    }
}
