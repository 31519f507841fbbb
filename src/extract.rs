//! AST visitors that pull policy-relevant facts out of a parsed statement
//!
//! Each collector implements [`sqlparser::ast::Visitor`] and looks at one
//! kind of node. `Statement::visit` drives the recursion, so subqueries,
//! joins, CTE bodies, set operations and expression subqueries are all
//! reached without a hand-written walk.

use crate::sql_parser::statement_kind;
use sqlparser::ast::{
    Expr, ObjectName, ObjectNamePart, Query, SetExpr, Statement, TableFactor, Visit, Visitor,
};
use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

/// Lower-cased dotted form of an object name (`Public.Person` -> `public.person`)
pub fn object_name_key(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.to_lowercase(),
            other => other.to_string().to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Calls `f` on every non-set-operation leaf of a query body
fn for_each_set_leaf<'a>(expr: &'a SetExpr, f: &mut impl FnMut(&'a SetExpr)) {
    match expr {
        SetExpr::SetOperation { left, right, .. } => {
            for_each_set_leaf(left, f);
            for_each_set_leaf(right, f);
        }
        other => f(other),
    }
}

/// Collects every table or view read by the statement
///
/// References that resolve to a common table expression in scope are not
/// tables and are skipped. Scoping follows PostgreSQL: a CTE is visible to
/// its query's body and to the CTEs declared after it, and to itself only
/// under `WITH RECURSIVE`.
#[derive(Debug, Default)]
pub struct TableRefCollector {
    pub tables: BTreeSet<String>,
    /// CTE names visible at each open query, innermost last
    scopes: Vec<BTreeSet<String>>,
    /// Visible names for CTE bodies not yet entered, keyed by node address
    cte_bodies: HashMap<usize, BTreeSet<String>>,
}

fn node_key(query: &Query) -> usize {
    query as *const Query as usize
}

impl TableRefCollector {
    fn is_cte_reference(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|visible| visible.contains(name))
    }

    fn record(&mut self, key: String) {
        // Only bare names can refer to a CTE
        if !key.contains('.') && self.is_cte_reference(&key) {
            return;
        }
        self.tables.insert(key);
    }
}

impl Visitor for TableRefCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        let inherited = match self.cte_bodies.remove(&node_key(query)) {
            Some(visible) => visible,
            None => self.scopes.last().cloned().unwrap_or_default(),
        };

        let mut visible = inherited.clone();
        if let Some(with) = &query.with {
            let names: Vec<String> = with
                .cte_tables
                .iter()
                .map(|cte| cte.alias.name.value.to_lowercase())
                .collect();
            for (index, cte) in with.cte_tables.iter().enumerate() {
                let mut body_scope = inherited.clone();
                let declared = if with.recursive { &names[..] } else { &names[..index] };
                body_scope.extend(declared.iter().cloned());
                self.cte_bodies.insert(node_key(&cte.query), body_scope);
            }
            visible.extend(names);
        }
        self.scopes.push(visible);

        // `TABLE person` carries its name as plain strings, not an ObjectName
        let mut plain_tables = Vec::new();
        for_each_set_leaf(&query.body, &mut |leaf| {
            if let SetExpr::Table(table) = leaf {
                if let Some(table_name) = &table.table_name {
                    let key = match &table.schema_name {
                        Some(schema) => format!("{}.{}", schema, table_name),
                        None => table_name.clone(),
                    };
                    plain_tables.push(key.to_lowercase());
                }
            }
        });
        for key in plain_tables {
            self.record(key);
        }
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        // A table factor with arguments is a set-returning function call
        if let TableFactor::Table {
            name, args: None, ..
        } = factor
        {
            self.record(object_name_key(name));
        }
        ControlFlow::Continue(())
    }
}

/// Collects every function invoked by the statement
#[derive(Debug, Default)]
pub struct FunctionCallCollector {
    pub functions: BTreeSet<String>,
}

impl Visitor for FunctionCallCollector {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        if let Expr::Function(function) = expr {
            self.functions.insert(object_name_key(&function.name));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<()> {
        match factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => {
                self.functions.insert(object_name_key(name));
            }
            TableFactor::Function { name, .. } => {
                self.functions.insert(object_name_key(name));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Finds side effects hidden inside an otherwise read-only query
///
/// The root statement is the first one visited; any further statement is
/// nested (data-modifying CTE, `INSERT ... RETURNING` in a subquery or a
/// set operation).
#[derive(Debug, Default)]
pub struct SideEffectFinder {
    statements_seen: usize,
    pub nested_kinds: BTreeSet<String>,
    pub select_into: bool,
    pub row_locking: bool,
}

impl Visitor for SideEffectFinder {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<()> {
        self.statements_seen += 1;
        if self.statements_seen > 1 {
            self.nested_kinds.insert(statement_kind(statement));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        if !query.locks.is_empty() {
            self.row_locking = true;
        }
        for_each_set_leaf(&query.body, &mut |leaf| {
            if let SetExpr::Select(select) = leaf {
                if select.into.is_some() {
                    self.select_into = true;
                }
            }
        });
        ControlFlow::Continue(())
    }
}

impl SideEffectFinder {
    /// Policy messages for everything found, in a stable order
    pub fn violations(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .nested_kinds
            .iter()
            .map(|kind| format!("Nested {} statements are not permitted", kind))
            .collect();
        if self.select_into {
            errors.push("SELECT INTO is not permitted".to_string());
        }
        if self.row_locking {
            errors.push("Row-locking clauses (FOR UPDATE/FOR SHARE) are not permitted".to_string());
        }
        errors
    }
}

/// Tables referenced anywhere in `stmt`, excluding CTE references
pub fn collect_tables(stmt: &Statement) -> BTreeSet<String> {
    let mut collector = TableRefCollector::default();
    let _ = stmt.visit(&mut collector);
    collector.tables
}

/// Functions called anywhere in `stmt`
pub fn collect_functions(stmt: &Statement) -> BTreeSet<String> {
    let mut collector = FunctionCallCollector::default();
    let _ = stmt.visit(&mut collector);
    collector.functions
}

/// Side effects nested inside `stmt`
pub fn find_side_effects(stmt: &Statement) -> SideEffectFinder {
    let mut finder = SideEffectFinder::default();
    let _ = stmt.visit(&mut finder);
    finder
}
