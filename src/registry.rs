//! Allow/block lists and row/time limits for generated SQL
//!
//! The registry is built once at startup and shared read-only as
//! `Arc<AllowBlockRegistry>`. Nothing mutates it after construction.

use std::collections::{BTreeMap, BTreeSet};

/// Default cap on rows returned by a single query
pub const DEFAULT_MAX_ROWS: usize = 500;

/// Default server-side statement timeout
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 10_000;

/// Longest natural-language question accepted (characters)
pub const MAX_QUESTION_LENGTH: usize = 1_000;

const ALLOWED_TABLES: &[&str] = &[
    "tenant",
    "person",
    "person_link",
    "aws_account",
    "aws_iam_user",
    "aws_iam_user_policy_attachment",
    "aws_idc_user",
    "aws_idc_group",
    "aws_idc_group_membership",
    "aws_idc_permission_set",
    "aws_idc_account_assignment",
    "gcp_project",
    "gcp_workspace_user",
    "gcp_workspace_group",
    "gcp_workspace_group_membership",
    "gcp_iam_binding",
    "github_organisation",
    "github_user",
    "github_team",
    "github_team_membership",
    "github_org_membership",
    "mv_effective_access",
    "entity_history",
    "snapshot_registry",
    // PII-redacted views
    "v_person_redacted",
    "v_aws_idc_user_redacted",
    "v_gcp_workspace_user_redacted",
    "v_github_user_redacted",
    "v_effective_access_redacted",
];

// Grouped by what they reach: files, large objects, other databases, session
// state, other backends, locks, delays, and SQL text run server-side
const BLOCKED_FUNCTIONS: &[&str] = &[
    // filesystem
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "pg_ls_logdir",
    "pg_ls_waldir",
    "pg_ls_tmpdir",
    "pg_ls_archive_statusdir",
    // large objects
    "lo_import",
    "lo_export",
    "lo_get",
    "lo_put",
    "lo_open",
    "loread",
    "lowrite",
    "lo_create",
    "lo_creat",
    "lo_unlink",
    "lo_from_bytea",
    // cross-database
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "dblink_send_query",
    "dblink_open",
    "copy",
    "pg_copy_from",
    "pg_copy_to",
    // session and backend control
    "set_config",
    "current_setting",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "txid_current",
    // advisory locks
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "pg_try_advisory_lock",
    // delays
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    // execute a query or dump a relation given as a string
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "query_to_xmlschema",
    "table_to_xml",
    "table_to_xml_and_xmlschema",
    "table_to_xmlschema",
    "cursor_to_xml",
    "cursor_to_xmlschema",
    "schema_to_xml",
    "schema_to_xml_and_xmlschema",
    "schema_to_xmlschema",
    "database_to_xml",
    "database_to_xml_and_xmlschema",
    "database_to_xmlschema",
];

const BLOCKED_TABLE_PREFIXES: &[&str] = &["pg_", "information_schema.", "pg_catalog."];

const BLOCKED_KEYWORDS: &[&str] = &[
    "GRANT",
    "REVOKE",
    "SET",
    "RESET",
    "LOAD",
    "COPY",
    "EXECUTE",
    "PREPARE",
    "DEALLOCATE",
    "LISTEN",
    "NOTIFY",
    "VACUUM",
    "ANALYZE",
    "CLUSTER",
    "REINDEX",
    "SECURITY DEFINER",
];

const SCHEMA_SYNONYMS: &[(&str, &[&str])] = &[
    ("aws_account", &["account", "aws account", "aws accounts"]),
    (
        "gcp_project",
        &["project", "gcp project", "google project", "gcp projects"],
    ),
    (
        "person",
        &["user", "person", "people", "employee", "staff", "member"],
    ),
    (
        "aws_idc_group",
        &["idc group", "identity center group", "aws group", "sso group"],
    ),
    (
        "gcp_workspace_group",
        &["workspace group", "google group", "gws group"],
    ),
    (
        "aws_idc_permission_set",
        &["permission set", "permission", "access level"],
    ),
    (
        "aws_idc_account_assignment",
        &["assignment", "account assignment", "aws assignment"],
    ),
    (
        "gcp_iam_binding",
        &["binding", "iam binding", "gcp binding", "role binding"],
    ),
    (
        "mv_effective_access",
        &["access", "effective access", "entitlement", "entitlements"],
    ),
    ("person_link", &["identity link", "linkage", "person link"]),
    (
        "entity_history",
        &["history", "audit trail", "change log", "changelog"],
    ),
    (
        "github_organisation",
        &[
            "github org",
            "github organisation",
            "github organization",
            "gh org",
        ],
    ),
    (
        "github_user",
        &["github user", "github member", "gh user", "github account"],
    ),
    ("github_team", &["github team", "gh team"]),
    (
        "github_team_membership",
        &["github team member", "team membership"],
    ),
    (
        "github_org_membership",
        &["github org member", "org membership"],
    ),
];

/// Static authorization policy for model-generated SQL
#[derive(Debug, Clone)]
pub struct AllowBlockRegistry {
    /// Lower-cased table/view names that may be queried
    pub allowed_tables: BTreeSet<String>,

    /// Lower-cased function names that must never be called
    pub blocked_functions: BTreeSet<String>,

    /// Checked in order; the first match is reported
    pub blocked_table_prefixes: Vec<String>,

    /// Upper-cased keywords rejected anywhere in the statement text
    pub blocked_keywords: BTreeSet<String>,

    pub max_rows: usize,

    pub statement_timeout_ms: u64,

    /// Table name to natural-language terms that refer to it
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl AllowBlockRegistry {
    /// Registry for the identity/effective-access schema with default limits
    pub fn standard() -> Self {
        Self::standard_with_limits(DEFAULT_MAX_ROWS, DEFAULT_STATEMENT_TIMEOUT_MS)
    }

    /// Registry for the identity/effective-access schema with custom limits
    pub fn standard_with_limits(max_rows: usize, statement_timeout_ms: u64) -> Self {
        Self {
            allowed_tables: ALLOWED_TABLES.iter().map(|t| t.to_string()).collect(),
            blocked_functions: BLOCKED_FUNCTIONS.iter().map(|f| f.to_string()).collect(),
            blocked_table_prefixes: BLOCKED_TABLE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            blocked_keywords: BLOCKED_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            max_rows,
            statement_timeout_ms,
            synonyms: SCHEMA_SYNONYMS
                .iter()
                .map(|(table, terms)| {
                    (
                        table.to_string(),
                        terms.iter().map(|t| t.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Whether `table` (already lower-cased) is in the allow-list
    pub fn is_table_allowed(&self, table: &str) -> bool {
        self.allowed_tables.contains(table)
    }

    /// First blocked prefix that `table` starts with, if any
    pub fn blocked_prefix_for(&self, table: &str) -> Option<&str> {
        self.blocked_table_prefixes
            .iter()
            .find(|prefix| table.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    pub fn is_function_blocked(&self, function: &str) -> bool {
        self.blocked_functions.contains(function)
    }
}

impl Default for AllowBlockRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
