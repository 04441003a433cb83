//! A small predicate AST rendered to parameterized SQL. Parameter names are
//! fixed at construction, so the same expression always renders the same
//! text and binds the same values.

use rusqlite::types::{ToSql, ToSqlOutput};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Int(i) => i.to_sql(),
            SqlValue::Text(s) => s.to_sql(),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// A named bind parameter. Names of every query after the first carry the
/// query index so OR-ed queries never collide.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: SqlValue,
}

impl Param {
    pub fn new(base: &str, query_index: usize, value: impl Into<SqlValue>) -> Self {
        let name = if query_index == 0 {
            format!(":{base}")
        } else {
            format!(":{base}{query_index}")
        };
        Self { name, value: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Sql(String),
    Param(Param),
    /// Comma-separated list, for `IN (...)`.
    List(Vec<Param>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `column op param`
    Compare { column: &'static str, op: &'static str, param: Param },
    /// Free-form SQL with embedded parameters, e.g. an EXISTS subquery.
    Raw(Vec<Piece>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn compare(column: &'static str, op: &'static str, param: Param) -> Self {
        Expr::Compare { column, op, param }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(vec![Piece::Sql(sql.into())])
    }

    pub fn negate(self, negated: bool) -> Self {
        if negated {
            Expr::Not(Box::new(self))
        } else {
            self
        }
    }

    /// Matches every row: an empty conjunction, or a disjunction with a
    /// trivial branch.
    pub fn is_trivial(&self) -> bool {
        match self {
            Expr::And(items) => items.iter().all(Expr::is_trivial),
            Expr::Or(items) => items.is_empty() || items.iter().any(Expr::is_trivial),
            _ => false,
        }
    }

    pub fn render(&self) -> Rendered {
        let mut out = Rendered::default();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut Rendered) {
        match self {
            Expr::Compare { column, op, param } => {
                out.sql.push_str(column);
                out.sql.push(' ');
                out.sql.push_str(op);
                out.sql.push(' ');
                out.bind(param);
            }
            Expr::Raw(pieces) => {
                for piece in pieces {
                    match piece {
                        Piece::Sql(s) => out.sql.push_str(s),
                        Piece::Param(p) => out.bind(p),
                        Piece::List(ps) => {
                            for (i, p) in ps.iter().enumerate() {
                                if i > 0 {
                                    out.sql.push_str(", ");
                                }
                                out.bind(p);
                            }
                        }
                    }
                }
            }
            Expr::Not(inner) => {
                out.sql.push_str("NOT (");
                inner.render_into(out);
                out.sql.push(')');
            }
            Expr::And(items) | Expr::Or(items) => {
                let joiner = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                let live: Vec<&Expr> = items.iter().filter(|e| !e.is_trivial()).collect();
                if live.is_empty() {
                    out.sql.push('1');
                    return;
                }
                for (i, item) in live.iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(joiner);
                    }
                    out.sql.push('(');
                    item.render_into(out);
                    out.sql.push(')');
                }
            }
        }
    }
}

/// SQL text plus the values for its named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

impl Rendered {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    fn bind(&mut self, p: &Param) {
        self.sql.push_str(&p.name);
        if !self.params.iter().any(|(n, _)| *n == p.name) {
            self.params.push((p.name.clone(), p.value.clone()));
        }
    }

    /// Append `other`, taking over its parameters.
    pub fn append(&mut self, other: Rendered) {
        self.sql.push_str(&other.sql);
        for (name, value) in other.params {
            if !self.params.iter().any(|(n, _)| *n == name) {
                self.params.push((name, value));
            }
        }
    }

    pub fn push_str(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    pub fn push_param(&mut self, p: Param) {
        self.bind(&p);
    }

    /// Borrowed view for `Statement::query`.
    pub fn named_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v as &dyn ToSql)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_carry_the_query_index_after_the_first() {
        assert_eq!(Param::new("begin_time", 0, 5).name, ":begin_time");
        assert_eq!(Param::new("begin_time", 2, 5).name, ":begin_time2");
    }

    #[test]
    fn renders_nested_boolean_structure() {
        let q0 = Expr::And(vec![
            Expr::compare("v.visit_date", ">=", Param::new("begin_time", 0, 1)),
            Expr::compare("v.visit_date", "<=", Param::new("end_time", 0, 9)),
        ]);
        let q1 = Expr::And(vec![Expr::compare(
            "h.rev_host",
            "=",
            Param::new("domain_lower", 1, "tset.a."),
        )]);
        let r = Expr::Or(vec![q0, q1]).render();
        assert_eq!(
            r.sql,
            "((v.visit_date >= :begin_time) AND (v.visit_date <= :end_time)) OR ((h.rev_host = :domain_lower1))"
        );
        assert_eq!(r.params.len(), 3);
        assert_eq!(r.params[2].1, SqlValue::Text("tset.a.".into()));
    }

    #[test]
    fn trivial_branches_drop_out() {
        assert!(Expr::And(vec![]).is_trivial());
        assert!(Expr::Or(vec![Expr::And(vec![]), Expr::raw("x = 1")]).is_trivial());
        let r = Expr::And(vec![Expr::And(vec![]), Expr::raw("x = 1")]).render();
        assert_eq!(r.sql, "(x = 1)");
    }

    #[test]
    fn lists_and_negation() {
        let tags = vec![Param::new("tag0_", 0, "a"), Param::new("tag1_", 0, "b")];
        let e = Expr::Raw(vec![
            Piece::Sql("h.id IN (SELECT fk FROM t WHERE title IN (".into()),
            Piece::List(tags),
            Piece::Sql("))".into()),
        ])
        .negate(true);
        let r = e.render();
        assert_eq!(r.sql, "NOT (h.id IN (SELECT fk FROM t WHERE title IN (:tag0_, :tag1_)))");
        assert_eq!(r.named_params().len(), 2);
    }
}
