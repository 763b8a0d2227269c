//! Cleanup of generated narrative text.
//!
//! Paragraphs are blank-line delimited. Inside a paragraph all whitespace runs
//! collapse to one space and near-duplicate sentences are dropped. The result
//! always ends with sentence-ending punctuation unless it is empty.

const TERMINATORS: [char; 6] = ['.', '!', '?', '。', '！', '？'];
const CLOSERS: [char; 7] = ['"', '\'', ')', '”', '’', '」', '）'];

/// Sentences whose lengths differ by at least this share of the longer one
/// are never duplicates.
const DUPLICATE_LENGTH_RATIO: f64 = 0.3;

pub fn normalize_narrative(raw: &str) -> String {
    let paragraphs: Vec<String> = split_paragraphs(raw)
        .iter()
        .map(|p| dedupe_sentences(p))
        .filter(|p| !p.is_empty())
        .collect();

    let mut text = paragraphs.join("\n\n");
    ensure_terminal_punctuation(&mut text);
    text
}

/// Two sentences are duplicates when one contains the other and they are
/// close in length.
pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    let (a_len, b_len) = (a.chars().count(), b.chars().count());
    let (short, long, short_len, long_len) = if a_len <= b_len {
        (a, b, a_len, b_len)
    } else {
        (b, a, b_len, a_len)
    };
    if long_len == 0 || !long.contains(short) {
        return false;
    }
    ((long_len - short_len) as f64) < DUPLICATE_LENGTH_RATIO * long_len as f64
}

fn split_paragraphs(raw: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(collapse_whitespace(&current.join(" ")));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(collapse_whitespace(&current.join(" ")));
    }

    paragraphs
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits after a terminator (plus any closing quotes). An ASCII period only
/// ends a sentence when followed by whitespace or the end of the text, so
/// decimals survive.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        i += 1;

        if !TERMINATORS.contains(&c) {
            continue;
        }
        if c == '.' && i < chars.len() && !chars[i].is_whitespace() && !CLOSERS.contains(&chars[i]) {
            continue;
        }
        while i < chars.len() && (CLOSERS.contains(&chars[i]) || TERMINATORS.contains(&chars[i])) {
            current.push(chars[i]);
            i += 1;
        }
        push_sentence(&mut sentences, &mut current);
    }
    push_sentence(&mut sentences, &mut current);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let sentence = current.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
    current.clear();
}

fn dedupe_sentences(paragraph: &str) -> String {
    let mut kept: Vec<String> = Vec::new();
    for sentence in split_sentences(paragraph) {
        if kept
            .iter()
            .any(|k| is_near_duplicate(sentence_body(k), sentence_body(&sentence)))
        {
            continue;
        }
        kept.push(sentence);
    }

    let mut out = String::new();
    for sentence in kept {
        if let Some(last) = out.chars().last() {
            if !is_cjk(last) {
                out.push(' ');
            }
        }
        out.push_str(&sentence);
    }
    out
}

/// Sentence without its closing punctuation, so "X." and "X!" compare equal.
fn sentence_body(sentence: &str) -> &str {
    sentence
        .trim_end_matches(|c: char| TERMINATORS.contains(&c) || CLOSERS.contains(&c))
        .trim_end()
}

fn ensure_terminal_punctuation(text: &mut String) {
    let Some(last) = text.trim_end_matches(|c: char| CLOSERS.contains(&c)).chars().last() else {
        return;
    };
    if TERMINATORS.contains(&last) {
        return;
    }
    text.push(if is_cjk(last) { '。' } else { '.' });
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3000}'..='\u{303f}' | '\u{4e00}'..='\u{9fff}' | '\u{ff00}'..='\u{ffef}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_and_keeps_paragraphs() {
        let raw = "  The photo was   taken\nnear the Bund.  \n\n\n  Alternatively,\tnear People's Square.  ";
        assert_eq!(
            normalize_narrative(raw),
            "The photo was taken near the Bund.\n\nAlternatively, near People's Square."
        );
    }

    #[test]
    fn test_drops_near_duplicate_sentences() {
        let raw = "It was taken near the Oriental Pearl Tower. It was taken near the Oriental Pearl Tower! The river is close.";
        assert_eq!(
            normalize_narrative(raw),
            "It was taken near the Oriental Pearl Tower. The river is close."
        );
    }

    #[test]
    fn test_keeps_contained_but_much_longer_sentence() {
        let short = "Near the tower.";
        let long = "Near the tower. It sits right beside the old bridge on the river.";
        assert!(!is_near_duplicate(short, long));
    }

    #[test]
    fn test_duplicates_only_within_paragraph() {
        let raw = "Near the tower.\n\nNear the tower.";
        assert_eq!(normalize_narrative(raw), "Near the tower.\n\nNear the tower.");
    }

    #[test]
    fn test_appends_terminal_punctuation() {
        assert_eq!(normalize_narrative("Near the Bund"), "Near the Bund.");
        assert_eq!(normalize_narrative("照片拍摄于外滩"), "照片拍摄于外滩。");
        assert_eq!(normalize_narrative("He said \"near the Bund.\""), "He said \"near the Bund.\"");
        assert_eq!(normalize_narrative("   "), "");
    }

    #[test]
    fn test_decimal_is_not_a_sentence_break() {
        let raw = "The places are 3.5 km apart. The places are 3.5 km apart.";
        assert_eq!(normalize_narrative(raw), "The places are 3.5 km apart.");
    }

    #[test]
    fn test_cjk_sentences_join_without_spaces() {
        let raw = "最可能在外滩。最可能在外滩。附近有桥！";
        assert_eq!(normalize_narrative(raw), "最可能在外滩。附近有桥！");
    }
}
