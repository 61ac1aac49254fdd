//! Plain-text cleanup applied before checksumming and chunking.

/// Fold typographic punctuation, drop control characters and collapse runs of
/// spaces. Newlines are kept (trimmed per line) so paragraph structure survives.
pub fn preprocess(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut cleaned = String::with_capacity(line.len());
        let mut last_space = true;
        for ch in line.chars() {
            let folded = match ch {
                '\u{201C}' | '\u{201D}' | '\u{201E}' => "\"",
                '\u{2018}' | '\u{2019}' | '\u{201A}' => "'",
                '\u{2013}' | '\u{2014}' => "-",
                '\u{2026}' => "...",
                '\u{00A0}' | '\t' => " ",
                c if c.is_control() => "",
                _ => {
                    if ch.is_whitespace() {
                        " "
                    } else {
                        cleaned.push(ch);
                        last_space = false;
                        continue;
                    }
                }
            };
            if folded == " " {
                if !last_space { cleaned.push(' '); last_space = true; }
            } else if !folded.is_empty() {
                cleaned.push_str(folded);
                last_space = false;
            }
        }
        if !out.is_empty() { out.push('\n'); }
        out.push_str(cleaned.trim_end());
    }
    out.trim().to_string()
}

/// Whitespace-delimited word count; the token unit used by the chunker.
pub fn count_tokens(text: &str) -> usize { text.split_whitespace().count() }
