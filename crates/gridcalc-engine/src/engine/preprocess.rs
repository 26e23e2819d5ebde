//! Formula lexing and translation to Rhai.
//!
//! Before a formula can be evaluated by Rhai it is lexed once and rewritten:
//!
//! - **References**: `A1`, `$B$2`, `Sheet2!C3`, `'My Sheet'!A1:B5` become scope
//!   constants `_ref_0`, `_ref_1`, ... whose values are resolved before evaluation
//! - **Literals**: integer literals become floats (`1` -> `1.0`), spreadsheet
//!   strings (`"say ""hi"""`) become Rhai strings, `TRUE`/`FALSE` become booleans
//! - **Operators**: `<>` -> `!=`, a lone `=` -> `==`, `^` -> `**`, `&` -> the
//!   text-joining operator [`CONCAT_OP`], postfix `%` divides its operand by 100
//! - **Function names**: calls to registered functions are upper-cased, so
//!   `sum(A1:A3)` and `SUM(A1:A3)` are the same call
//!
//! References inside string literals are ignored. The same lexer feeds
//! dependency extraction, so both resolve references identically.

use regex::Regex;
use std::sync::OnceLock;

use super::cell_ref::{CellCoords, CellPosition, CellRange, Reference, unquote_sheet};

/// A formula rewritten for Rhai, plus the references its scope constants stand for.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedFormula {
    pub script: String,
    /// `references[i]` is bound to the scope constant [`scope_name(i)`](scope_name).
    pub references: Vec<Reference>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token<'a> {
    Str(&'a str),
    Ref(Reference),
    Number(&'a str),
    Ident(&'a str),
    Space(&'a str),
    Punct(&'a str),
}

const TWO_CHAR_OPS: &[&str] = &[
    "<>", "<=", ">=", "==", "!=", "**", "&&", "||", "=>", "->", "::", "..", "+=", "-=",
];

/// Rhai custom operator standing in for the spreadsheet `&`.
pub(crate) const CONCAT_OP: &str = "_concat_";

/// Name of the scope constant bound to the `index`-th reference.
pub fn scope_name(index: usize) -> String {
    format!("_ref_{}", index)
}

/// Strip the leading `=` (and surrounding whitespace) from formula text.
pub fn formula_body(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).trim()
}

/// Translate a formula to a Rhai script.
///
/// `is_function` reports whether an upper-cased identifier names a registered
/// function; only those identifiers are upper-cased when called.
pub fn prepare_formula(
    text: &str,
    position: &CellPosition,
    is_function: &dyn Fn(&str) -> bool,
) -> PreparedFormula {
    let tokens = tokenize(formula_body(text), &position.sheet);
    let mut references: Vec<Reference> = Vec::new();
    let mut script = String::with_capacity(text.len() + 16);
    // Script offset where the operand ending at the current token starts.
    let mut operand: Option<usize> = None;
    // Offsets of the callee or `(` of each open parenthesis.
    let mut groups: Vec<usize> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let start = script.len();
        match token {
            Token::Str(raw) => {
                script.push_str(&rhai_string_literal(raw));
                operand = Some(start);
            }
            Token::Ref(reference) => {
                let index = match references.iter().position(|r| r == reference) {
                    Some(index) => index,
                    None => {
                        references.push(reference.clone());
                        references.len() - 1
                    }
                };
                script.push_str(&scope_name(index));
                operand = Some(start);
            }
            Token::Number(raw) => {
                script.push_str(&float_literal(raw));
                operand = Some(start);
            }
            Token::Ident(name) => {
                let called = next_significant(&tokens, i) == Some(&Token::Punct("("));
                let upper = name.to_ascii_uppercase();
                if called && is_function(&upper) {
                    script.push_str(&upper);
                } else if !called && (upper == "TRUE" || upper == "FALSE") {
                    script.push_str(&upper.to_ascii_lowercase());
                } else {
                    script.push_str(name);
                }
                operand = Some(start);
            }
            Token::Space(s) => script.push_str(s),
            Token::Punct("(") => {
                let callee = matches!(previous_significant(&tokens, i), Some(Token::Ident(_)));
                groups.push(if callee { operand.unwrap_or(start) } else { start });
                script.push('(');
                operand = None;
            }
            Token::Punct(")") => {
                script.push(')');
                operand = groups.pop();
            }
            Token::Punct("%") if is_percent_postfix(&tokens, i) => match operand {
                Some(open) => {
                    script.insert(open, '(');
                    script.push_str("/100.0)");
                }
                None => script.push('%'),
            },
            Token::Punct("&") => {
                script.push(' ');
                script.push_str(CONCAT_OP);
                script.push(' ');
                operand = None;
            }
            Token::Punct(p) => {
                script.push_str(match *p {
                    "<>" => "!=",
                    "=" => "==",
                    "^" => "**",
                    other => other,
                });
                operand = None;
            }
        }
    }

    PreparedFormula { script, references }
}

/// Lex a formula body (without the leading `=`). Unqualified references are
/// placed on `sheet`.
pub(crate) fn tokenize<'a>(body: &'a str, sheet: &str) -> Vec<Token<'a>> {
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < body.len() {
        let rest = &body[i..];
        let Some(ch) = rest.chars().next() else {
            break;
        };

        if ch == '"' {
            let len = string_literal_len(rest);
            tokens.push(Token::Str(&rest[..len]));
            i += len;
            continue;
        }

        if ch == '\'' || ch == '$' || ch.is_ascii_alphabetic() || ch == '_' {
            if let Some((len, reference)) = match_reference(rest, sheet) {
                tokens.push(Token::Ref(reference));
                i += len;
                continue;
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                let len = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                tokens.push(Token::Ident(&rest[..len]));
                i += len;
                continue;
            }
        }

        if ch.is_ascii_digit() || (ch == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit()))
        {
            let len = number_re().find(rest).map(|m| m.end()).unwrap_or(1);
            tokens.push(Token::Number(&rest[..len]));
            i += len;
            continue;
        }

        if ch.is_whitespace() {
            let len = rest
                .find(|c: char| !c.is_whitespace())
                .unwrap_or(rest.len());
            tokens.push(Token::Space(&rest[..len]));
            i += len;
            continue;
        }

        if let Some(op) = TWO_CHAR_OPS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Punct(&rest[..op.len()]));
            i += op.len();
            continue;
        }

        let len = ch.len_utf8();
        tokens.push(Token::Punct(&rest[..len]));
        i += len;
    }

    tokens
}

fn next_significant<'t, 'a>(tokens: &'t [Token<'a>], i: usize) -> Option<&'t Token<'a>> {
    tokens[i + 1..]
        .iter()
        .find(|t| !matches!(t, Token::Space(_)))
}

fn previous_significant<'t, 'a>(tokens: &'t [Token<'a>], i: usize) -> Option<&'t Token<'a>> {
    tokens[..i]
        .iter()
        .rev()
        .find(|t| !matches!(t, Token::Space(_)))
}

/// `%` right after an operand and not followed by one is a percentage.
fn is_percent_postfix(tokens: &[Token<'_>], i: usize) -> bool {
    let after_operand = matches!(
        previous_significant(tokens, i),
        Some(Token::Number(_) | Token::Ref(_) | Token::Ident(_) | Token::Str(_) | Token::Punct(")"))
    );
    let before_operand = matches!(
        next_significant(tokens, i),
        Some(Token::Number(_) | Token::Ref(_) | Token::Ident(_) | Token::Str(_) | Token::Punct("("))
    );
    after_operand && !before_operand
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?<sheet>[A-Za-z_][A-Za-z0-9_.]*|'(?:[^']|'')+')!)?(?<start>\$?[A-Za-z]{1,3}\$?[0-9]{1,7})(?::(?<end>\$?[A-Za-z]{1,3}\$?[0-9]{1,7}))?",
        )
        .expect("formula reference regex must compile")
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?")
            .expect("number literal regex must compile")
    })
}

/// Match a reference at the start of `text`. A match that runs into an
/// identifier character or an opening parenthesis (`LOG10(`) is not a reference.
fn match_reference(text: &str, default_sheet: &str) -> Option<(usize, Reference)> {
    let caps = reference_re().captures(text)?;
    let len = caps.get(0)?.end();
    if text[len..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '(') {
        return None;
    }

    let sheet = caps
        .name("sheet")
        .map(|m| unquote_sheet(m.as_str()))
        .unwrap_or_else(|| default_sheet.to_string());
    let start = CellCoords::parse_a1(&caps["start"])?;
    let reference = match caps.name("end") {
        Some(end) => {
            let end = CellCoords::parse_a1(end.as_str())?;
            Reference::Range(CellRange::new(sheet, start, end))
        }
        None => Reference::Cell(CellPosition::from_coords(sheet, start)),
    };
    Some((len, reference))
}

/// Length of the string literal at the start of `text`, honouring `""` escapes.
/// An unterminated literal runs to the end of the text.
fn string_literal_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 1usize;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn rhai_string_literal(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        // Unterminated: leave it for the Rhai parser to report.
        return raw.to_string();
    };
    let unescaped = inner.replace("\"\"", "\"");
    let mut out = String::with_capacity(unescaped.len() + 2);
    out.push('"');
    for c in unescaped.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn float_literal(raw: &str) -> String {
    let (mantissa, exponent) = match raw.find(['e', 'E']) {
        Some(idx) => raw.split_at(idx),
        None => (raw, ""),
    };
    let mantissa = if mantissa.starts_with('.') {
        format!("0{}", mantissa)
    } else if mantissa.ends_with('.') {
        format!("{}0", mantissa)
    } else if mantissa.contains('.') {
        mantissa.to_string()
    } else {
        format!("{}.0", mantissa)
    };
    format!("{}{}", mantissa, exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos() -> CellPosition {
        CellPosition::new("Sheet1", 1, 1)
    }

    fn known(name: &str) -> bool {
        matches!(name, "SUM" | "IF" | "LOG10")
    }

    fn prepare(text: &str) -> PreparedFormula {
        prepare_formula(text, &pos(), &known)
    }

    #[test]
    fn test_prepare_replaces_references_with_scope_names() {
        let prepared = prepare("=A1 + B2 * A1");
        assert_eq!(prepared.script, "_ref_0 + _ref_1 * _ref_0");
        assert_eq!(
            prepared.references,
            vec![
                Reference::Cell(CellPosition::new("Sheet1", 1, 1)),
                Reference::Cell(CellPosition::new("Sheet1", 2, 2)),
            ]
        );
    }

    #[test]
    fn test_prepare_ranges_and_function_case() {
        let prepared = prepare("=sum(A1:A3) + Data!$B$2");
        assert_eq!(prepared.script, "SUM(_ref_0) + _ref_1");
        assert_eq!(
            prepared.references,
            vec![
                Reference::Range(CellRange::new(
                    "Sheet1",
                    CellCoords::new(1, 1),
                    CellCoords::new(3, 1)
                )),
                Reference::Cell(CellPosition::new("Data", 2, 2)),
            ]
        );
    }

    #[test]
    fn test_prepare_quoted_sheet_names() {
        let prepared = prepare("='Q1 Sales'!A1:B2");
        assert_eq!(prepared.script, "_ref_0");
        assert_eq!(prepared.references[0].sheet(), "Q1 Sales");
    }

    #[test]
    fn test_prepare_literals_and_operators() {
        assert_eq!(prepare("=7/2").script, "7.0/2.0");
        assert_eq!(prepare("=.5 + 1e3 + 2.").script, "0.5 + 1.0e3 + 2.0");
        assert_eq!(prepare("=2^3").script, "2.0**3.0");
        assert_eq!(prepare("=A1<>1").script, "_ref_0!=1.0");
        assert_eq!(prepare("=A1=1").script, "_ref_0==1.0");
        assert_eq!(prepare("=A1>=1").script, "_ref_0>=1.0");
        assert_eq!(prepare("=IF(TRUE, 1, 0)").script, "IF(true, 1.0, 0.0)");
    }

    #[test]
    fn test_prepare_ampersand_and_percent() {
        assert_eq!(prepare(r#"=A1&"x""#).script, r#"_ref_0 _concat_ "x""#);
        assert_eq!(prepare("=50%").script, "(50.0/100.0)");
        assert_eq!(prepare("=A1% * 2").script, "(_ref_0/100.0) * 2.0");
        assert_eq!(prepare("=sum(A1:A2)%").script, "(SUM(_ref_0)/100.0)");
        assert_eq!(prepare("=2*(A1+1)%").script, "2.0*((_ref_0+1.0)/100.0)");
        assert_eq!(prepare("=A1 % 2").script, "_ref_0 % 2.0");
        assert_eq!(prepare(r#"="50%""#).script, r#""50%""#);
    }

    #[test]
    fn test_prepare_string_literals() {
        let prepared = prepare(r#"="A1 says ""hi"" \o/""#);
        assert_eq!(prepared.script, r#""A1 says \"hi\" \\o/""#);
        assert!(prepared.references.is_empty());
    }

    #[test]
    fn test_function_names_are_not_references() {
        let prepared = prepare("=LOG10(A2)");
        assert_eq!(prepared.script, "LOG10(_ref_0)");
        assert_eq!(prepared.references.len(), 1);
    }

    #[test]
    fn test_unknown_functions_keep_their_case() {
        assert_eq!(prepare("=myFunc(A1)").script, "myFunc(_ref_0)");
    }

    #[test]
    fn test_identifiers_are_not_split() {
        let prepared = prepare("=x.len() + abcd1");
        assert_eq!(prepared.script, "x.len() + abcd1");
        assert!(prepared.references.is_empty());
    }
}
