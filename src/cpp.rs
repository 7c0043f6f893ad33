//! Line-based scanner for CPP conditional directives.
//!
//! Stands in for a full preprocessor front-end: it only looks at
//! `#if`/`#ifdef`/`#ifndef`/`#elif`/`#else`/`#endif` plus `#define`/`#undef`
//! and feeds the block-tree builder in document order, so define mangling
//! interleaves with expression normalization exactly as the file reads.
//! No macro expansion happens here.

use crate::block::{BlockId, BlockKind, CppFile};

/// Build the conditional-block tree of a source text.
pub fn scan(filename: &str, source: &str) -> CppFile {
    let mut file = CppFile::new(filename);
    let mut stack: Vec<BlockId> = vec![file.root()];

    let mut lines = source.lines().enumerate().peekable();
    let mut last_line = 0u32;

    while let Some((index, first)) = lines.next() {
        let line_number = (index + 1) as u32;
        last_line = line_number;

        // join continuation lines onto the directive
        let mut logical = first.to_string();
        while logical.ends_with('\\') {
            logical.pop();
            match lines.next() {
                Some((i, next)) => {
                    last_line = (i + 1) as u32;
                    logical.push(' ');
                    logical.push_str(next);
                }
                None => break,
            }
        }

        let trimmed = logical.trim_start();
        if !trimmed.starts_with('#') {
            continue;
        }
        let col = (first.len() - first.trim_start().len()) as u32;
        let directive = trimmed[1..].trim_start();
        let keyword_end = directive
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(directive.len());
        let (keyword, rest) = directive.split_at(keyword_end);
        let rest = strip_comments(rest);

        match keyword {
            "if" => {
                let parent = *stack.last().expect("root stays on the stack");
                let id = file.add_block(BlockKind::If, parent, None, &rest, line_number, col);
                stack.push(id);
            }
            "ifdef" => {
                let parent = *stack.last().expect("root stays on the stack");
                let id = file.add_block(
                    BlockKind::If,
                    parent,
                    None,
                    leading_identifier(&rest),
                    line_number,
                    col,
                );
                stack.push(id);
            }
            "ifndef" => {
                let parent = *stack.last().expect("root stays on the stack");
                let id = file.add_block(
                    BlockKind::Ifndef,
                    parent,
                    None,
                    leading_identifier(&rest),
                    line_number,
                    col,
                );
                stack.push(id);
            }
            "elif" | "else" => {
                if stack.len() < 2 {
                    log::warn!("{}:{}: #{} without #if", filename, line_number, keyword);
                    continue;
                }
                let prev = stack.pop().expect("guarded by the length check");
                file.close_block(prev, line_number, col);
                let parent = file.block(prev).parent.expect("non-root block has a parent");
                let kind = if keyword == "elif" {
                    BlockKind::Elif
                } else {
                    BlockKind::Else
                };
                let id = file.add_block(kind, parent, Some(prev), &rest, line_number, col);
                stack.push(id);
            }
            "endif" => {
                if stack.len() < 2 {
                    log::warn!("{}:{}: unbalanced #endif", filename, line_number);
                    continue;
                }
                let block = stack.pop().expect("guarded by the length check");
                file.close_block(block, line_number, col);
            }
            "define" => {
                let name = leading_identifier(&rest);
                if !name.is_empty() {
                    let block = *stack.last().expect("root stays on the stack");
                    file.add_define(name, true, block);
                }
            }
            "undef" => {
                let name = leading_identifier(&rest);
                if !name.is_empty() {
                    let block = *stack.last().expect("root stays on the stack");
                    file.add_define(name, false, block);
                }
            }
            _ => {}
        }
    }

    // close anything the source left open
    while stack.len() > 1 {
        let block = stack.pop().expect("guarded by the length check");
        log::warn!(
            "{}: block {} is not terminated",
            filename,
            file.block(block).name
        );
        file.close_block(block, last_line, 0);
    }
    file.close_block(file.root(), last_line + 1, 0);

    file
}

/// Drop `/* ... */` and trailing `//` comments from a directive tail and
/// collapse the whitespace continuations leave behind.
fn strip_comments(text: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.find("/*") {
        match out[start..].find("*/") {
            Some(end) => out.replace_range(start..start + end + 2, " "),
            None => {
                out.truncate(start);
                break;
            }
        }
    }
    if let Some(pos) = out.find("//") {
        out.truncate(pos);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First identifier of a directive tail, e.g. the macro name of a
/// `#define FOO(x)`.
fn leading_identifier(text: &str) -> &str {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;

    #[test]
    fn nested_chains_build_the_expected_tree() {
        let source = "\
#if A
int a;
#elif B
int b;
#else
#ifdef C
int c;
#endif
#endif
";
        let file = scan("test.c", source);
        let blocks: Vec<_> = file.blocks().map(|id| file.block(id)).collect();
        assert_eq!(blocks.len(), 4);

        assert_eq!(blocks[0].name, "B0");
        assert_eq!(blocks[0].kind, BlockKind::If);
        assert_eq!(blocks[0].expression, "A");
        assert_eq!((blocks[0].line_start, blocks[0].line_end), (1, 3));

        assert_eq!(blocks[1].kind, BlockKind::Elif);
        assert_eq!(blocks[1].prev_sibling, Some(file.blocks().next().unwrap()));

        assert_eq!(blocks[2].kind, BlockKind::Else);
        assert_eq!((blocks[2].line_start, blocks[2].line_end), (5, 9));

        assert_eq!(blocks[3].name, "B3");
        assert_eq!(blocks[3].expression, "C");
        let else_id = file.blocks().nth(2).unwrap();
        assert_eq!(blocks[3].parent, Some(else_id));
    }

    #[test]
    fn ifndef_reads_negated() {
        let file = scan("test.h", "#ifndef GUARD_H\n#define GUARD_H\n#endif\n");
        let guard = file.blocks().next().unwrap();
        assert_eq!(file.block(guard).kind, BlockKind::Ifndef);
        assert_eq!(file.block(guard).expression, "! GUARD_H");
        // the define landed inside the guard block
        assert_eq!(file.defines()["GUARD_H"].defined_in, vec![guard]);
    }

    #[test]
    fn continuations_and_comments_are_folded() {
        let source = "#if defined(A) && \\\n    defined(B) /* both */\nx\n#endif // done\n";
        let file = scan("test.c", source);
        let b0 = file.blocks().next().unwrap();
        assert_eq!(file.block(b0).expression, "(A) && (B)");
        assert_eq!(file.block(b0).line_end, 4);
    }

    #[test]
    fn function_like_defines_keep_only_the_name() {
        let file = scan("test.c", "#define MAX(a, b) ((a) > (b) ? (a) : (b))\n");
        assert!(file.defines().contains_key("MAX"));
    }

    #[test]
    fn unbalanced_files_still_scan() {
        let file = scan("test.c", "#if A\nx\n");
        let b0 = file.blocks().next().unwrap();
        assert_eq!(file.block(b0).line_end, 2);

        let stray = scan("test.c", "#endif\nx\n");
        assert_eq!(stray.block_count(), 0);
    }

    #[test]
    fn define_rewriting_matches_later_blocks() {
        // the S4 shape: a define inside one chain feeds the next chain
        let source = "\
#ifdef FOO
#define BAR
#ifdef BAR
x
#else
y
#endif
#endif
";
        let file = scan("test.c", source);
        let formula = file.code_constraints();
        assert_eq!(
            formula,
            "( B0 <-> FOO )\n\
             && ( B1 <-> B0 && BAR. )\n\
             && ( B2 <-> B0 && ( ! (B1) ) )\n\
             && (B0 -> BAR.)\n\
             && (!B0 -> (BAR <-> BAR.))\n\
             && B00"
        );
    }
}
