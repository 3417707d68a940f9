//! Read-only gate and regional predicate injection for generated SQL.
//!
//! The guard never trusts model output. Every statement must be a single `SELECT`;
//! callers without global access additionally get `lower(<region column>) = lower(:region)`
//! spliced into the top-level `WHERE`, with the region travelling as a bound parameter.
//!
//! # Known limitation
//!
//! This is keyword-position text surgery, not a parser. Clause keywords are found only at
//! parenthesis depth zero and outside literals, which covers the statements the model
//! produces for this dataset, but unusual syntax can still defeat it. The restricted
//! session role and forwarded claims on the Postgres connection are the second layer.

use std::sync::Arc;

use supplyq_core::domain::caller::Role;
use supplyq_core::domain::statement::{
    is_select_statement, leading_keyword, BoundParam, GuardedStatement,
};
use supplyq_core::errors::QueryError;
use supplyq_core::policy::AccessPolicy;

pub const REGION_PARAM: &str = "region";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Clause {
    Where,
    GroupBy,
    OrderBy,
    Limit,
    Having,
    Union,
    Intersect,
    Except,
    Offset,
    Fetch,
    Window,
    Locking,
}

impl Clause {
    fn is_set_operation(&self) -> bool {
        matches!(self, Self::Union | Self::Intersect | Self::Except)
    }
}

#[derive(Clone, Copy, Debug)]
struct Boundary {
    clause: Clause,
    start: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct Scan {
    boundaries: Vec<Boundary>,
    has_comment: bool,
    has_dollar_quote: bool,
    has_semicolon: bool,
}

#[derive(Clone, Copy, Debug)]
struct Word {
    start: usize,
    end: usize,
}

#[derive(Clone)]
pub struct QueryGuard {
    policy: Arc<AccessPolicy>,
}

impl QueryGuard {
    pub fn new(policy: Arc<AccessPolicy>) -> Self {
        Self { policy }
    }

    pub fn guard(
        &self,
        sql: &str,
        role: &Role,
        region: &str,
    ) -> Result<GuardedStatement, QueryError> {
        let normalized = normalize(sql);
        if !is_select_statement(normalized) {
            let keyword = leading_keyword(normalized);
            let shown = if keyword.is_empty() { "<none>" } else { keyword };
            return Err(QueryError::unsafe_statement(format!(
                "first token is `{shown}`, expected SELECT"
            )));
        }

        let scan = scan(normalized);
        if scan.has_semicolon {
            return Err(QueryError::unsafe_statement("multiple statements are not allowed"));
        }

        let unrestricted = self.policy.resolve_region(region).is_unrestricted();
        if self.policy.is_global_access(role) || unrestricted {
            return GuardedStatement::new(sql, Vec::new());
        }

        if scan.has_comment {
            return Err(QueryError::unsafe_statement(
                "comments are not allowed in region-scoped statements",
            ));
        }
        if scan.has_dollar_quote {
            return Err(QueryError::unsafe_statement(
                "dollar-quoted strings are not allowed in region-scoped statements",
            ));
        }
        if scan.boundaries.iter().any(|boundary| boundary.clause.is_set_operation()) {
            return Err(QueryError::unsafe_statement("set operations cannot be region-scoped"));
        }

        let predicate = format!("lower({}) = lower(:{REGION_PARAM})", self.policy.region_column());
        let scoped = inject_predicate(normalized, &scan.boundaries, &predicate)?;

        GuardedStatement::new(
            format!("{scoped};"),
            vec![BoundParam::new(REGION_PARAM, region.trim())],
        )
    }
}

fn normalize(sql: &str) -> &str {
    sql.trim().trim_end_matches(|ch: char| ch == ';' || ch.is_whitespace())
}

fn inject_predicate(
    text: &str,
    boundaries: &[Boundary],
    predicate: &str,
) -> Result<String, QueryError> {
    let existing_where = boundaries.iter().find(|boundary| boundary.clause == Clause::Where);

    match existing_where {
        Some(where_clause) => {
            let tail_start = boundaries
                .iter()
                .filter(|boundary| {
                    boundary.start > where_clause.start && boundary.clause != Clause::Where
                })
                .map(|boundary| boundary.start)
                .min();
            let condition_end = tail_start.unwrap_or(text.len());
            let condition = text[where_clause.end..condition_end].trim();
            if condition.is_empty() {
                return Err(QueryError::unsafe_statement("WHERE clause has no condition"));
            }

            let mut output =
                format!("{} ({condition}) AND ({predicate})", &text[..where_clause.end]);
            if let Some(start) = tail_start {
                output.push(' ');
                output.push_str(&text[start..]);
            }
            Ok(output)
        }
        None => {
            let insert_at = boundaries.iter().map(|boundary| boundary.start).min();
            let head = &text[..insert_at.unwrap_or(text.len())];
            let mut output = format!("{} WHERE ({predicate})", head.trim_end());
            if let Some(start) = insert_at {
                output.push(' ');
                output.push_str(&text[start..]);
            }
            Ok(output)
        }
    }
}

/// Walks the statement once, collecting depth-zero clause keywords.
fn scan(text: &str) -> Scan {
    let bytes = text.as_bytes();
    let mut result = Scan::default();
    let mut words: Vec<Word> = Vec::new();
    let mut depth: usize = 0;
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        match byte {
            b'\'' | b'"' => index = skip_quoted(bytes, index),
            b'-' if bytes.get(index + 1) == Some(&b'-') => {
                result.has_comment = true;
                while index < bytes.len() && bytes[index] != b'\n' {
                    index += 1;
                }
            }
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                result.has_comment = true;
                index += 2;
                while index < bytes.len()
                    && !(bytes[index] == b'*' && bytes.get(index + 1) == Some(&b'/'))
                {
                    index += 1;
                }
                index = (index + 2).min(bytes.len());
            }
            b'(' => {
                depth += 1;
                index += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                index += 1;
            }
            b';' => {
                result.has_semicolon = true;
                index += 1;
            }
            b'$' => match dollar_tag_end(bytes, index) {
                Some(tag_end) => {
                    result.has_dollar_quote = true;
                    index = skip_dollar_quoted(bytes, index, tag_end);
                }
                // `$1` style positional parameter
                None => {
                    index += 1;
                    while index < bytes.len() && bytes[index].is_ascii_digit() {
                        index += 1;
                    }
                }
            },
            _ if is_ident_byte(byte) => {
                let start = index;
                while index < bytes.len() && is_ident_byte(bytes[index]) {
                    index += 1;
                }
                if depth == 0 && byte.is_ascii_alphabetic() {
                    words.push(Word { start, end: index });
                }
            }
            _ => index += 1,
        }
    }

    result.boundaries = clause_boundaries(text, &words);
    result
}

fn clause_boundaries(text: &str, words: &[Word]) -> Vec<Boundary> {
    let mut boundaries = Vec::new();

    for (position, word) in words.iter().enumerate() {
        let token = &text[word.start..word.end];
        let single = match token.to_ascii_uppercase().as_str() {
            "WHERE" => Some(Clause::Where),
            "LIMIT" => Some(Clause::Limit),
            "HAVING" => Some(Clause::Having),
            "UNION" => Some(Clause::Union),
            "INTERSECT" => Some(Clause::Intersect),
            "EXCEPT" => Some(Clause::Except),
            "OFFSET" => Some(Clause::Offset),
            "FETCH" => Some(Clause::Fetch),
            "WINDOW" => Some(Clause::Window),
            "FOR" => {
                let locks = words.get(position + 1).is_some_and(|next| {
                    let next = text[next.start..next.end].to_ascii_uppercase();
                    matches!(next.as_str(), "UPDATE" | "SHARE" | "NO" | "KEY")
                });
                locks.then_some(Clause::Locking)
            }
            "GROUP" | "ORDER" => {
                let followed_by_by = words.get(position + 1).is_some_and(|next| {
                    text[next.start..next.end].eq_ignore_ascii_case("by")
                        && text[word.end..next.start].trim().is_empty()
                });
                match (followed_by_by, token.eq_ignore_ascii_case("group")) {
                    (true, true) => Some(Clause::GroupBy),
                    (true, false) => Some(Clause::OrderBy),
                    (false, _) => None,
                }
            }
            _ => None,
        };

        if let Some(clause) = single {
            boundaries.push(Boundary { clause, start: word.start, end: word.end });
        }
    }

    boundaries
}

fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut index = open + 1;
    while index < bytes.len() {
        if bytes[index] == quote {
            if bytes.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    bytes.len()
}

/// Returns the index of the closing `$` of a `$$` or `$tag$` opener starting at `open`.
fn dollar_tag_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut index = open + 1;
    match bytes.get(index) {
        Some(b'$') => return Some(index),
        Some(byte) if byte.is_ascii_alphabetic() || *byte == b'_' => {}
        _ => return None,
    }
    while index < bytes.len() && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_') {
        index += 1;
    }
    (bytes.get(index) == Some(&b'$')).then_some(index)
}

fn skip_dollar_quoted(bytes: &[u8], open: usize, tag_end: usize) -> usize {
    let tag = &bytes[open..=tag_end];
    let body = tag_end + 1;
    bytes
        .get(body..)
        .and_then(|rest| rest.windows(tag.len()).position(|window| window == tag))
        .map_or(bytes.len(), |found| body + found + tag.len())
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use supplyq_core::domain::caller::Role;
    use supplyq_core::errors::ErrorKind;
    use supplyq_core::policy::AccessPolicy;

    use super::QueryGuard;

    fn guard() -> QueryGuard {
        QueryGuard::new(Arc::new(AccessPolicy::builtin()))
    }

    fn finance() -> Role {
        Role::new("Finance")
    }

    fn scoped(sql: &str) -> String {
        guard().guard(sql, &finance(), "India").expect("statement is scoped").text().to_string()
    }

    fn rejected(sql: &str, role: &Role) -> ErrorKind {
        guard().guard(sql, role, "India").expect_err("statement is rejected").kind()
    }

    #[test]
    fn non_select_statements_are_rejected_for_every_role() {
        let operations = Role::new("Operations Manager");
        for sql in [
            "DELETE FROM supply_chain;",
            "  update supply_chain set sales = 0",
            "DROP TABLE supply_chain",
            "INSERT INTO supply_chain VALUES (1)",
            "WITH t AS (SELECT 1) SELECT * FROM t",
            "",
        ] {
            assert_eq!(rejected(sql, &finance()), ErrorKind::UnsafeStatement, "{sql}");
            assert_eq!(rejected(sql, &operations), ErrorKind::UnsafeStatement, "{sql}");
        }
    }

    #[test]
    fn stacked_statements_are_rejected() {
        let operations = Role::new("Operations Manager");
        assert_eq!(
            rejected("SELECT 1; DROP TABLE supply_chain", &operations),
            ErrorKind::UnsafeStatement
        );
        assert_eq!(rejected("SELECT 1;\nDELETE FROM x;", &finance()), ErrorKind::UnsafeStatement);
    }

    #[test]
    fn semicolons_inside_literals_are_not_statement_breaks() {
        let text = scoped("SELECT sales FROM supply_chain WHERE product_name = 'a;b'");
        assert_eq!(
            text,
            "SELECT sales FROM supply_chain WHERE (product_name = 'a;b') AND (lower(order_country) = lower(:region));"
        );
    }

    #[test]
    fn global_role_passes_through_byte_identical() {
        let sql = "SELECT sales FROM supply_chain WHERE category_id = 5 ORDER BY sales;";
        for region in ["India", "All", ""] {
            let guarded = guard()
                .guard(sql, &Role::new("Operations Manager"), region)
                .expect("global role passes");
            assert_eq!(guarded.text(), sql);
            assert!(guarded.params().is_empty());
        }
    }

    #[test]
    fn unrestricted_region_passes_through_for_any_role() {
        let sql = "select sales from supply_chain -- everything\n";
        let guarded = guard().guard(sql, &finance(), " all ").expect("sentinel region passes");
        assert_eq!(guarded.text(), sql);
        assert!(guarded.params().is_empty());
    }

    #[test]
    fn missing_where_gets_bound_region_predicate() {
        let guarded = guard()
            .guard("SELECT sales FROM supply_chain", &finance(), "India")
            .expect("scoped");

        assert_eq!(
            guarded.text(),
            "SELECT sales FROM supply_chain WHERE (lower(order_country) = lower(:region));"
        );
        assert_eq!(guarded.param("region"), Some("India"));
        assert!(!guarded.text().contains("India"));
    }

    #[test]
    fn existing_where_is_extended_before_order_by() {
        let text = scoped("SELECT sales FROM supply_chain WHERE category_id = 5 ORDER BY sales");
        assert_eq!(
            text,
            "SELECT sales FROM supply_chain WHERE (category_id = 5) AND (lower(order_country) = lower(:region)) ORDER BY sales;"
        );

        let condition = text.find("category_id = 5").expect("condition kept");
        let injected = text.find("AND (lower(order_country)").expect("predicate injected");
        let order_by = text.find("ORDER BY").expect("order by kept");
        assert!(condition < injected && injected < order_by);
    }

    #[test]
    fn disjunctions_keep_their_precedence() {
        let text = scoped("SELECT * FROM supply_chain WHERE market = 'LATAM' OR market = 'Europe'");
        assert!(text.contains(
            "WHERE (market = 'LATAM' OR market = 'Europe') AND (lower(order_country) = lower(:region))"
        ));
    }

    #[test]
    fn predicate_lands_before_the_earliest_trailing_clause() {
        assert_eq!(
            scoped("SELECT market, sum(sales) FROM supply_chain GROUP BY market HAVING sum(sales) > 10 ORDER BY 2 DESC LIMIT 3"),
            "SELECT market, sum(sales) FROM supply_chain WHERE (lower(order_country) = lower(:region)) GROUP BY market HAVING sum(sales) > 10 ORDER BY 2 DESC LIMIT 3;"
        );
        assert_eq!(
            scoped("select sales from supply_chain limit 5 offset 10;"),
            "select sales from supply_chain WHERE (lower(order_country) = lower(:region)) limit 5 offset 10;"
        );
        assert_eq!(
            scoped("select sales from supply_chain where sales > 100 limit 5"),
            "select sales from supply_chain where (sales > 100) AND (lower(order_country) = lower(:region)) limit 5;"
        );
    }

    #[test]
    fn nested_clauses_and_literals_are_ignored() {
        assert_eq!(
            scoped("SELECT * FROM (SELECT order_id FROM supply_chain WHERE sales > 1 ORDER BY sales) s LIMIT 5"),
            "SELECT * FROM (SELECT order_id FROM supply_chain WHERE sales > 1 ORDER BY sales) s WHERE (lower(order_country) = lower(:region)) LIMIT 5;"
        );
        assert_eq!(
            scoped("SELECT order_status FROM supply_chain WHERE order_status = 'order by limit' ORDER BY order_id"),
            "SELECT order_status FROM supply_chain WHERE (order_status = 'order by limit') AND (lower(order_country) = lower(:region)) ORDER BY order_id;"
        );
        assert_eq!(
            scoped("SELECT \"where\", order_id, limited FROM supply_chain"),
            "SELECT \"where\", order_id, limited FROM supply_chain WHERE (lower(order_country) = lower(:region));"
        );
    }

    #[test]
    fn scoped_statements_reject_comments_and_set_operations() {
        assert_eq!(
            rejected("SELECT sales FROM supply_chain -- WHERE 1=1", &finance()),
            ErrorKind::UnsafeStatement
        );
        assert_eq!(
            rejected("SELECT sales FROM supply_chain /* ORDER BY */", &finance()),
            ErrorKind::UnsafeStatement
        );
        assert_eq!(
            rejected(
                "SELECT sales FROM supply_chain UNION SELECT sales FROM supply_chain",
                &finance()
            ),
            ErrorKind::UnsafeStatement
        );
        assert_eq!(
            rejected(
                "SELECT sales FROM supply_chain WHERE true OR $$ LIMIT $$ = 'x' OR $1 IS NULL",
                &finance()
            ),
            ErrorKind::UnsafeStatement
        );
        assert_eq!(
            rejected("SELECT $q$ ORDER BY $q$ AS label FROM supply_chain", &finance()),
            ErrorKind::UnsafeStatement
        );
    }

    #[test]
    fn dollar_quotes_pass_through_for_global_callers() {
        let sql = "SELECT $$a;b$$ AS label, price$usd FROM supply_chain";
        let guarded = guard()
            .guard(sql, &Role::new("Operations Manager"), "India")
            .expect("global role passes");
        assert_eq!(guarded.text(), sql);
    }

    #[test]
    fn positional_markers_and_dollar_identifiers_are_not_quotes() {
        assert_eq!(
            scoped("SELECT price$usd FROM supply_chain WHERE sales > $1"),
            "SELECT price$usd FROM supply_chain WHERE (sales > $1) AND (lower(order_country) = lower(:region));"
        );
    }

    #[test]
    fn locking_clauses_stay_after_the_predicate() {
        assert_eq!(
            scoped("SELECT sales FROM supply_chain FOR SHARE"),
            "SELECT sales FROM supply_chain WHERE (lower(order_country) = lower(:region)) FOR SHARE;"
        );
        assert_eq!(
            scoped("SELECT sales FROM supply_chain WHERE sales > 1 LIMIT 2 FOR NO KEY UPDATE"),
            "SELECT sales FROM supply_chain WHERE (sales > 1) AND (lower(order_country) = lower(:region)) LIMIT 2 FOR NO KEY UPDATE;"
        );
    }

    #[test]
    fn region_value_is_trimmed_and_never_inlined() {
        let guarded = guard()
            .guard("SELECT 1 FROM supply_chain", &Role::new("Planning"), "  O'Brien Land ")
            .expect("scoped");
        assert_eq!(guarded.param("region"), Some("O'Brien Land"));
        assert!(!guarded.text().contains("Brien"));
    }

    #[test]
    fn unknown_roles_are_scoped_not_trusted() {
        let guarded = guard()
            .guard("SELECT sales FROM supply_chain", &Role::new("Intern"), "USA")
            .expect("scoped");
        assert_eq!(guarded.param("region"), Some("USA"));
    }
}
