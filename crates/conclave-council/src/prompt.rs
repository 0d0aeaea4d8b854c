//! Builds the system turn each participant carries into every backend
//! call: who it is, who else sits in the council, and how addressing
//! works. This turn is synthesized per call and never becomes a
//! transcript record.

use conclave_core::config::ParticipantConfig;
use conclave_core::types::ParticipantId;

pub struct PromptBuilder {
    id: ParticipantId,
    display_name: String,
    others: Vec<(ParticipantId, String)>,
}

impl PromptBuilder {
    pub fn new(me: &ParticipantConfig, roster: &[ParticipantConfig]) -> Self {
        let others = roster
            .iter()
            .filter(|p| p.id != me.id)
            .map(|p| (p.id.clone(), p.display_name().to_string()))
            .collect();
        Self {
            id: me.id.clone(),
            display_name: me.display_name().to_string(),
            others,
        }
    }

    pub fn build(&self) -> String {
        let mut out = format!(
            "You are {} (@{}), one of several AI participants in a shared council \
             discussion driven by a human (\"user\").",
            self.display_name, self.id
        );

        if !self.others.is_empty() {
            let roster = self
                .others
                .iter()
                .map(|(id, name)| format!("@{id} ({name})"))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(" The other participants are: {roster}."));
        }

        out.push_str(
            " Replies from other participants appear as assistant turns prefixed with \
             their bracketed id. Address a specific participant by writing @their-id; \
             only reply when the discussion calls for your voice, and keep replies \
             focused.",
        );
        out
    }
}
