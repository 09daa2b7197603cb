/// How much of a document is searched for `\documentclass`
pub const DOCUMENTCLASS_SCAN_BYTES: usize = 10 * 1024;

const PREAMBLE: &str = "\\documentclass[12pt]{article}\n\
\\usepackage[english]{babel}\n\
\\usepackage[utf8]{inputenc}\n\
\\usepackage{amsmath}\n\
\\usepackage{tikz}\n\
\\begin{document}\n";

const POSTAMBLE: &str = "\n\\end{document}\n";

fn prefix(content: &str, max: usize) -> &str {
    let mut end = content.len().min(max);
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

pub fn has_documentclass(content: &str) -> bool {
    prefix(content, DOCUMENTCLASS_SCAN_BYTES).contains("\\documentclass")
}

/// Wraps a bare LaTeX fragment into a compilable document, unless it
/// already declares a class or the result would exceed `max_doc_length`.
pub fn wrap_snippet(content: String, max_doc_length: usize) -> String {
    if has_documentclass(&content) {
        return content;
    }
    if PREAMBLE.len() + content.len() + POSTAMBLE.len() > max_doc_length {
        tracing::debug!("snippet too long to wrap, leaving it as is");
        return content;
    }
    format!("{}{}{}", PREAMBLE, content, POSTAMBLE)
}

/// Contents of the first `\title{...}`, with nested braces balanced
pub fn extract_title(content: &str) -> Option<String> {
    let start = content.find("\\title{")? + "\\title{".len();
    let mut depth = 1usize;
    for (offset, c) in content[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let title = content[start..start + offset]
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ");
                    return (!title.is_empty()).then_some(title);
                }
            }
            _ => {}
        }
    }
    None
}
