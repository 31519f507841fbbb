//! System prompt construction
//!
//! The prompt carries the query rules, the cached schema context, the
//! natural-language synonyms from the registry, a handful of worked examples
//! and the JSON contract the reply must follow.

use crate::registry::AllowBlockRegistry;
use crate::types::ModelAnswer;

/// One worked question/answer pair shown to the model
#[derive(Debug, Clone, Copy)]
pub struct FewShotExample {
    pub question: &'static str,
    pub plan: &'static str,
    pub sql: &'static str,
    pub explanation: &'static str,
}

pub const FEW_SHOT_EXAMPLES: &[FewShotExample] = &[
    FewShotExample {
        question: "Who has admin access in AWS?",
        plan: "List people whose effective AWS access includes an admin role or permission set.",
        sql: "SELECT p.display_name, p.primary_email, ea.account_or_project_id, ea.role_or_permission_set \
              FROM mv_effective_access ea JOIN person p ON p.id = ea.person_id \
              WHERE ea.cloud_provider = 'aws' AND ea.role_or_permission_set ILIKE '%admin%' \
              ORDER BY p.display_name LIMIT 500",
        explanation: "mv_effective_access flattens direct and group-derived grants into one row per person, resource and role.",
    },
    FewShotExample {
        question: "Show Alice's linked identities",
        plan: "Find the person and every provider identity linked to them.",
        sql: "SELECT p.display_name, pl.provider_type, pl.provider_identity_id \
              FROM person p JOIN person_link pl ON pl.person_id = p.id \
              WHERE p.display_name ILIKE '%alice%' \
              ORDER BY p.display_name, pl.provider_type LIMIT 500",
        explanation: "person_link maps a person to their AWS, Google Workspace and GitHub identities.",
    },
    FewShotExample {
        question: "Which GitHub users are not linked to anyone?",
        plan: "Find GitHub users with no person_link row.",
        sql: "SELECT gu.login, gu.email FROM github_user gu \
              WHERE NOT EXISTS (SELECT 1 FROM person_link pl \
                                WHERE pl.provider_type = 'github' AND pl.provider_identity_id = gu.node_id) \
              ORDER BY gu.login LIMIT 500",
        explanation: "Unlinked GitHub users are often external collaborators or accounts with hidden emails.",
    },
    FewShotExample {
        question: "How many people have access in each cloud?",
        plan: "Count distinct people per cloud provider in the effective-access view.",
        sql: "SELECT ea.cloud_provider, COUNT(DISTINCT ea.person_id) AS people \
              FROM mv_effective_access ea GROUP BY ea.cloud_provider ORDER BY people DESC",
        explanation: "Each person is counted once per provider regardless of how many grants they hold.",
    },
    FewShotExample {
        question: "Who has left but still has access?",
        plan: "Join departed people to their remaining effective access.",
        sql: "SELECT p.display_name, p.status, ea.cloud_provider, ea.access_path \
              FROM person p JOIN mv_effective_access ea ON ea.person_id = p.id \
              WHERE p.status = 'departed' \
              ORDER BY p.display_name, ea.cloud_provider LIMIT 500",
        explanation: "Departed people with remaining grants are candidates for deprovisioning.",
    },
];

const TABLE_RELATIONSHIPS: &str = "\
IMPORTANT TABLE RELATIONSHIPS:
- person is the central identity entity; person_link maps a person to provider identities
  (provider_type = 'aws_idc' | 'gcp_workspace' | 'github', provider_identity_id = the provider's user id)
- mv_effective_access is the flattened view of who can access what: person_id, cloud_provider,
  account_or_project_id, role_or_permission_set, access_path ('direct' or 'group')
- AWS Identity Center: aws_idc_group_membership links aws_idc_group to aws_idc_user;
  aws_idc_account_assignment links a user or group to an aws_account through an aws_idc_permission_set
- Google: gcp_workspace_group_membership links gcp_workspace_group to gcp_workspace_user;
  gcp_iam_binding grants a role on a gcp_project to a member
- GitHub: github_org_membership links github_user to github_organisation with a role;
  github_team_membership links github_user to github_team
- entity_history records changes to every entity; snapshot_registry lists ingestion snapshots
- v_*_redacted views expose the same rows with personal data masked";

/// Human-readable synonym reference built from the registry
///
/// ```
/// # use cloudintel_nl2sql::registry::AllowBlockRegistry;
/// # use cloudintel_nl2sql::prompt::synonym_context;
/// let text = synonym_context(&AllowBlockRegistry::standard());
/// assert!(text.starts_with("Synonym mapping (user might say -> actual table):"));
/// assert!(text.contains("-> person"));
/// ```
pub fn synonym_context(registry: &AllowBlockRegistry) -> String {
    let mut lines = vec!["Synonym mapping (user might say -> actual table):".to_string()];
    for (table, terms) in &registry.synonyms {
        lines.push(format!("  \"{}\" -> {}", terms.join("\", \""), table));
    }
    lines.join("\n")
}

fn few_shot_context() -> String {
    FEW_SHOT_EXAMPLES
        .iter()
        .enumerate()
        .map(|(i, example)| {
            format!(
                "Example {}:\nQuestion: \"{}\"\nQuery Plan: {}\nSQL: {}\nExplanation: {}\n",
                i + 1,
                example.question,
                example.plan,
                example.sql,
                example.explanation
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSON schema of [`ModelAnswer`], pretty-printed
pub fn response_contract() -> String {
    let schema = schemars::schema_for!(ModelAnswer);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Full system prompt for one question
pub fn build_system_prompt(schema_context: &str, registry: &AllowBlockRegistry) -> String {
    format!(
        "You are a database query agent for a Cloud Account & Identity Intelligence system.
Your role is to convert natural language questions into safe PostgreSQL queries.

RULES (MANDATORY):
1. Generate ONLY a single SELECT statement. Never INSERT, UPDATE, DELETE, CREATE, DROP, ALTER, GRANT, or TRUNCATE.
2. Always include appropriate JOINs to provide human-readable results (names, emails, not just UUIDs).
3. Use ILIKE for name/email searches (case-insensitive).
4. Always add ORDER BY for deterministic results.
5. Add LIMIT {max_rows} unless the user specifies a smaller limit.
6. Never access pg_catalog, information_schema, or system tables.
7. If the question is ambiguous, set needsClarification to true and provide clarificationOptions.
8. All data is multi-tenant; queries are scoped to a single tenant by row-level security. Never filter on tenant_id yourself.

DATABASE SCHEMA:
{schema}

{synonyms}

{relationships}

{examples}
Respond with a single JSON object (no prose) matching this JSON schema:
{contract}

Example response:
{{
  \"queryPlan\": {{ \"description\": \"...\", \"tablesUsed\": [\"...\"], \"estimatedComplexity\": \"low|medium|high\" }},
  \"sql\": \"SELECT ...\",
  \"explanation\": \"How the results should be interpreted...\",
  \"followUpSuggestions\": [\"...\", \"...\"],
  \"needsClarification\": false,
  \"clarificationMessage\": null,
  \"clarificationOptions\": null
}}",
        max_rows = registry.max_rows,
        schema = schema_context,
        synonyms = synonym_context(registry),
        relationships = TABLE_RELATIONSHIPS,
        examples = few_shot_context(),
        contract = response_contract(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::StatementValidator;
    use std::sync::Arc;

    #[test]
    fn test_examples_pass_validation() {
        let validator = StatementValidator::new(Arc::new(AllowBlockRegistry::standard()));
        assert!(validator.is_ok());
        if let Ok(validator) = validator {
            for example in FEW_SHOT_EXAMPLES {
                let verdict = validator.validate(example.sql);
                assert!(
                    verdict.is_valid,
                    "example {:?} rejected: {:?}",
                    example.question,
                    verdict.errors
                );
            }
        }
    }

    #[test]
    fn test_prompt_sections() {
        let registry = AllowBlockRegistry::standard_with_limits(250, 5_000);
        let prompt = build_system_prompt("-- Table: person", &registry);
        assert!(prompt.contains("Add LIMIT 250"));
        assert!(prompt.contains("DATABASE SCHEMA:\n-- Table: person"));
        assert!(prompt.contains("Synonym mapping"));
        assert!(prompt.contains("Example 5:"));
        assert!(prompt.contains("\"needsClarification\": false"));
    }

    #[test]
    fn test_contract_names_camel_case_fields() {
        let contract = response_contract();
        for field in ["queryPlan", "sql", "followUpSuggestions", "needsClarification", "estimatedComplexity"] {
            assert!(contract.contains(field), "contract missing {}", field);
        }
    }
}
