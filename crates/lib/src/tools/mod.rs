//! Tool layer: the two feedback tools the orchestrator declares to the model.

mod feedback;

pub use feedback::{FeedbackTools, Proposal, ProposalArena};
pub use crate::llm::ToolDefinition;

use serde_json::json;

pub const PROPOSE_ENTRY: &str = "propose_entry";
pub const CONFIRM_ENTRY: &str = "confirm_entry";

/// Function declarations for `propose_entry` and `confirm_entry`.
pub fn declarations() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: PROPOSE_ENTRY.to_string(),
            description: "Propõe o registro de uma manifestação (demanda, sugestão ou opinião) \
                          e pede confirmação ao usuário. Não grava nada."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "kind": {
                        "type": "string",
                        "enum": ["demand", "suggestion", "opinion"],
                        "description": "Tipo da manifestação"
                    },
                    "description": {
                        "type": "string",
                        "description": "Descrição completa do relato do usuário"
                    },
                    "title": {
                        "type": "string",
                        "description": "Título curto (opcional)"
                    }
                },
                "required": ["kind", "description"]
            }),
        },
        ToolDefinition {
            name: CONFIRM_ENTRY.to_string(),
            description: "Registra a manifestação depois que o usuário confirmou (confirm=true) \
                          ou cancela o registro (confirm=false)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "kind": {
                        "type": "string",
                        "enum": ["demand", "suggestion", "opinion"],
                        "description": "Tipo da manifestação"
                    },
                    "description": {
                        "type": "string",
                        "description": "Descrição completa do relato do usuário"
                    },
                    "title": {
                        "type": "string",
                        "description": "Título curto (opcional)"
                    },
                    "confirm": {
                        "type": "boolean",
                        "description": "true para registrar, false para cancelar"
                    }
                },
                "required": ["kind", "description", "confirm"]
            }),
        },
    ]
}
