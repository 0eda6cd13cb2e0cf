//! Instruction prompts sent with each region image.
//!
//! Kept in one place so prompt changes never touch the request or retry
//! code, and so tests can assert on them directly.

/// Instruction sent with every region image.
///
/// The recognition model is expected to answer with a JSON object carrying
/// at least `text`, plus the front-matter fields named here.
pub const OCR_PROMPT: &str = "Attached is one page of a document that you must process. \
Just return the plain text representation of this document as if you were reading it naturally. \
Convert equations to LateX and tables to markdown.\n\
Return your output as markdown, with a front matter section on top specifying values for the \
primary_language, is_rotation_valid, rotation_correction, is_table, and is_diagram parameters.";
