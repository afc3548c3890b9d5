//! Built-in participants for analysis and regeneration runs.

use srdgen_core::config::{OrchestrationConfig, RoleConfig};
pub use srdgen_core::FEEDBACK_COORDINATOR;
use srdgen_core::{AgentRole, ArtifactTag, DomainError, RoleRoster, TerminationPolicy};

pub const REQUIREMENT_ANALYST: &str = "RequirementAnalyst";
pub const FRONTEND_SPECIALIST: &str = "FrontendSpecialist";
pub const BACKEND_SPECIALIST: &str = "BackendSpecialist";
pub const ANALYSIS_COORDINATOR: &str = "AnalysisCoordinator";

const ANALYST_PROMPT: &str = "You are a Senior Requirements Analyst. Read the project document and \
categorize every requirement into two sections.\n\n\
## FRONTEND REQUIREMENTS:\n\
- UI components, layouts, navigation and routing\n\
- UX workflows, forms, validation and user feedback\n\
- Client-side authentication screens, responsiveness and accessibility\n\n\
## BACKEND REQUIREMENTS:\n\
- Business logic, data models and database design\n\
- API endpoints, authentication and authorization\n\
- Integrations, background jobs, security and scalability\n\n\
Be specific and quote the document where it helps. Do not write the final documents yourself.";

const FRONTEND_PROMPT: &str = "You are a Frontend Architecture Specialist. Focus exclusively on \
client-side requirements and ignore server concerns.\n\n\
Write a FRONTEND-ONLY Software Requirements Document with these sections:\n\
# Frontend Software Requirements Document\n\
## 1. User Interface Requirements\n\
## 2. User Experience Requirements\n\
## 3. Client-Side Functionality\n\
## 4. Responsive Design & Accessibility\n\
## 5. Frontend Technical Requirements\n\n\
Build on the analyst's categorization and on earlier specialist messages in the conversation.";

const BACKEND_PROMPT: &str = "You are a Backend Architecture Specialist. Focus exclusively on \
server-side requirements and ignore UI concerns.\n\n\
Write a BACKEND-ONLY Software Requirements Document with these sections:\n\
# Backend Software Requirements Document\n\
## 1. System Architecture\n\
## 2. Database Requirements\n\
## 3. API Specifications\n\
## 4. Security & Authentication\n\
## 5. Performance, Scalability & Integrations\n\n\
Build on the analyst's categorization and on earlier specialist messages in the conversation.";

const COORDINATOR_PROMPT: &str = "You are the Analysis Coordinator. Review the conversation so far. \
If any frontend or backend requirement from the document has not been covered by the specialists, \
list the gaps briefly so they can address them on their next turn. When both documents are \
complete, reply with a one-paragraph summary followed by the exact phrase ";

const FEEDBACK_PROMPT: &str = "You are the user's proxy in a document revision. The context contains \
the CURRENT document and the USER FEEDBACK. On your first turn, restate the feedback as a concrete \
list of changes for the specialist. Instruct the specialist to revise the existing document, keeping \
everything the feedback does not touch, rather than writing a new one. On later turns, check the \
revision against the feedback; when every point is addressed reply with the exact phrase ";

const REVISION_SUFFIX: &str = "\n\nYou are now REVISING an existing document, not writing a new one. \
Apply the requested changes and reply with the complete updated document only.";

/// A validated roster together with the policy that ends its run.
#[derive(Clone, Debug)]
pub struct ConversationPlan {
    pub roster: RoleRoster,
    pub policy: TerminationPolicy,
}

/// Roster for the initial analysis. Configured `[[roles]]` replace the
/// built-in catalog when present.
pub fn analysis_plan(
    orchestration: &OrchestrationConfig,
    configured: &[RoleConfig],
) -> Result<ConversationPlan, DomainError> {
    let marker = orchestration.analysis_completion_marker.as_str();
    let (roles, terminal) = if configured.is_empty() {
        (builtin_analysis_roles(marker), Some(ANALYSIS_COORDINATOR.to_string()))
    } else {
        let reserved = configured.iter().find(|role| role.name.trim() == FEEDBACK_COORDINATOR);
        if let Some(role) = reserved {
            return Err(DomainError::ReservedRoleName(role.name.clone()));
        }
        let roles = configured
            .iter()
            .map(|role| {
                AgentRole::new(
                    role.name.clone(),
                    role.system_prompt.clone(),
                    role.produces.iter().copied(),
                )
            })
            .collect();
        let terminal = configured.iter().find(|role| role.terminal).map(|role| role.name.clone());
        (roles, terminal)
    };

    let roster = RoleRoster::new(roles)?;
    let mut policy = TerminationPolicy::new(orchestration.analysis_max_messages)?;
    if let Some(terminal) = terminal {
        policy = policy.with_completion(terminal, marker);
    }
    Ok(ConversationPlan { roster, policy })
}

/// Reduced roster for revising one artifact: the feedback coordinator speaks
/// first, followed by every analysis role that produces `tag`.
pub fn regeneration_plan(
    orchestration: &OrchestrationConfig,
    analysis: &RoleRoster,
    tag: ArtifactTag,
) -> Result<ConversationPlan, DomainError> {
    let marker = orchestration.regeneration_completion_marker.as_str();
    let producers = analysis.producers_of(tag);
    if producers.is_empty() {
        return Err(DomainError::InvariantViolation(format!(
            "no role produces the `{tag}` artifact"
        )));
    }

    let mut roles = Vec::with_capacity(producers.len() + 1);
    roles.push(AgentRole::new(FEEDBACK_COORDINATOR, format!("{FEEDBACK_PROMPT}`{marker}`."), []));
    roles.extend(producers.into_iter().map(|producer| {
        AgentRole::new(
            producer.name.clone(),
            format!("{}{REVISION_SUFFIX}", producer.system_prompt),
            [tag],
        )
    }));

    let roster = RoleRoster::new(roles)?;
    let policy = TerminationPolicy::new(orchestration.regeneration_max_messages)?
        .with_completion(FEEDBACK_COORDINATOR, marker);
    Ok(ConversationPlan { roster, policy })
}

fn builtin_analysis_roles(marker: &str) -> Vec<AgentRole> {
    vec![
        AgentRole::new(REQUIREMENT_ANALYST, ANALYST_PROMPT, []),
        AgentRole::new(FRONTEND_SPECIALIST, FRONTEND_PROMPT, [ArtifactTag::Frontend]),
        AgentRole::new(BACKEND_SPECIALIST, BACKEND_PROMPT, [ArtifactTag::Backend]),
        AgentRole::new(ANALYSIS_COORDINATOR, format!("{COORDINATOR_PROMPT}`{marker}`."), []),
    ]
}
