//! Movetext tokenizer.

use crate::types::GameResult;

/// Reduce a movetext block to its mainline SAN moves.
///
/// Drops brace and semicolon comments, numeric annotation glyphs, move
/// numbers, inline annotations, the termination marker, and every variation
/// (variations may nest; only depth zero is kept).
pub fn tokenize_movetext(movetext: &str) -> Vec<String> {
    let mut moves = Vec::new();
    let mut token = String::new();
    let mut depth = 0usize;
    let mut chars = movetext.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                flush_token(&mut token, &mut moves, depth);
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
            }
            ';' => {
                flush_token(&mut token, &mut moves, depth);
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                flush_token(&mut token, &mut moves, depth);
                depth += 1;
            }
            ')' => {
                flush_token(&mut token, &mut moves, depth);
                depth = depth.saturating_sub(1);
            }
            c if c.is_whitespace() => flush_token(&mut token, &mut moves, depth),
            c => token.push(c),
        }
    }
    flush_token(&mut token, &mut moves, depth);

    moves
}

fn flush_token(token: &mut String, moves: &mut Vec<String>, depth: usize) {
    if token.is_empty() {
        return;
    }
    if depth == 0 {
        if let Some(san) = clean_token(token) {
            moves.push(san);
        }
    }
    token.clear();
}

/// Strip a move number prefix and annotations; `None` for non-move tokens.
fn clean_token(token: &str) -> Option<String> {
    if token.starts_with('$') || token == "*" || GameResult::from_pgn(token).is_some() {
        return None;
    }

    // "12." / "12..." / "12.e4" / "12...Nf6"
    let without_number = token.trim_start_matches(|c: char| c.is_ascii_digit());
    let without_number = if without_number.len() != token.len() {
        if !without_number.starts_with('.') {
            // Bare digits ("0-0" castling starts with a digit).
            token
        } else {
            without_number.trim_start_matches('.')
        }
    } else {
        token
    };

    let san = without_number.trim_end_matches(['!', '?']);
    if san.is_empty() || san.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(san.to_string())
}
