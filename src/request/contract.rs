//! Contract review prompt composition.
//!
//! Contract models receive document, instruction and question as one query;
//! the document always comes first.

const DOCUMENT_HEADER: &str = "以下是需要审阅的合同内容 / The following is the contract document to review:";
const INSTRUCTION: &str = "请基于上述合同内容，使用与问题相同的语言回答下面的问题。如合同未涉及相关内容，请明确说明。\n\
Based on the contract above, answer the question below in the language it is asked in. \
If the contract does not cover it, say so explicitly.";
const QUESTION_HEADER: &str = "问题 / Question:";

/// Compose the single query string sent to a contract model.
pub fn compose_contract_query(document: &str, question: &str) -> String {
    format!(
        "{DOCUMENT_HEADER}\n\n{}\n\n{INSTRUCTION}\n\n{QUESTION_HEADER}\n{}",
        document.trim(),
        question.trim()
    )
}
