//! Tag-delimited extraction from model completions.
//!
//! Both scanners are linear and literal: no nesting, no escaping, and no
//! inspection of what sits between the tags.

use thiserror::Error;

use super::conversation_state::PracticeProblem;

pub const PRACTICE_START: &str = "<practice>";
pub const PRACTICE_END: &str = "</practice>";
pub const ANSWER_START: &str = "<answer>";
pub const ANSWER_END: &str = "</answer>";
pub const QUESTION_START: &str = "<question>";
pub const QUESTION_END: &str = "</question>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing start tag: {0}")]
    MissingStartTag(String),
    #[error("missing end tag: {0}")]
    MissingEndTag(String),
    #[error("malformed response: missing {0} tag")]
    MalformedBlock(String),
    #[error("no {0} blocks found in the response")]
    NoBlocksFound(String),
}

/// Returns the trimmed text between the first `start_tag` and the first
/// `end_tag` that follows it.
pub fn extract_field<'a>(text: &'a str, start_tag: &str, end_tag: &str) -> Result<&'a str, ParseError> {
    let start = text
        .find(start_tag)
        .ok_or_else(|| ParseError::MissingStartTag(start_tag.to_string()))?
        + start_tag.len();
    let end = text[start..]
        .find(end_tag)
        .ok_or_else(|| ParseError::MissingEndTag(end_tag.to_string()))?
        + start;
    Ok(text[start..end].trim())
}

/// Collects the trimmed interior of every `start_tag ... end_tag` block, left
/// to right. An opened block without a close fails the whole call.
pub fn extract_all_blocks<'a>(
    text: &'a str,
    start_tag: &str,
    end_tag: &str,
) -> Result<Vec<&'a str>, ParseError> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(start_tag) {
        let start = cursor + offset + start_tag.len();
        let end = text[start..]
            .find(end_tag)
            .ok_or_else(|| ParseError::MalformedBlock(end_tag.to_string()))?
            + start;
        blocks.push(text[start..end].trim());
        cursor = end + end_tag.len();
    }

    if blocks.is_empty() {
        return Err(ParseError::NoBlocksFound(start_tag.to_string()));
    }
    Ok(blocks)
}

/// Raw problem bodies from a `<practice>` draft.
pub fn parse_practice_problems(response: &str) -> Result<Vec<String>, ParseError> {
    let blocks = extract_all_blocks(response, PRACTICE_START, PRACTICE_END)?;
    Ok(blocks.into_iter().map(str::to_string).collect())
}

/// A decode that failed part-way, carrying whatever fields were recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct PartialDecode {
    pub partial: PracticeProblem,
    pub error: ParseError,
}

/// Decodes an `<answer>`/`<question>` pair. Each tag pair is searched
/// independently in the full text, so their order does not matter.
pub fn parse_answer_and_question(response: &str) -> Result<PracticeProblem, PartialDecode> {
    let answer = extract_field(response, ANSWER_START, ANSWER_END);
    let question = extract_field(response, QUESTION_START, QUESTION_END);

    let partial = PracticeProblem {
        answer: answer.as_deref().unwrap_or_default().to_string(),
        question: question.as_deref().unwrap_or_default().to_string(),
    };

    match answer.and(question) {
        Ok(_) => Ok(partial),
        Err(error) => Err(PartialDecode { partial, error }),
    }
}
