//! One-shot rewriting from the canonical `?`-placeholder SQL text the rest of
//! the crate is written against into the placeholder style the configured
//! backend expects (spec.md §4.1, REDESIGN FLAGS).
//!
//! Every statement in `crate::store`/`crate::compact`/`crate::watch` is
//! written once, in `?` form; [`rewrite`] is applied at statement
//! registration time and the result is cached next to the prepared handle
//! (see `crate::driver::stmt_cache`) so the scan over the SQL text only
//! happens once per distinct statement.

use crate::config::ParamStyle;

/// Rewrites every top-level `?` in `sql` into the target placeholder style.
/// `?` inside single-quoted string literals is left untouched so literal
/// question marks in stored SQL text (there are none in this crate's own
/// statements, but the scan must still be literal-aware for correctness)
/// don't get mistaken for placeholders.
pub fn rewrite(sql: &str, style: ParamStyle) -> String {
    if style == ParamStyle::Question {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_string = false;
    let mut n = 0u32;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                out.push(c);
            }
            '?' if !in_string => {
                n += 1;
                match style {
                    ParamStyle::Dollar => out.push_str(&format!("${n}")),
                    ParamStyle::At => out.push_str(&format!("@{n}")),
                    ParamStyle::Question => unreachable!(),
                }
            }
            _ => out.push(c),
        }
    }
    out
}
