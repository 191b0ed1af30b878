use serde::{Deserialize, Serialize};

use crate::{dao::cloud_store::CloudDocument, state::game::GameCode};

/// Prefix of every game document id.
pub const GAME_PREFIX: &str = "game::";

/// Game document as stored in CouchDB, with its revision for optimistic updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchGameDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub game: CloudDocument,
}

impl From<(CloudDocument, Option<String>)> for CouchGameDocument {
    fn from((game, rev): (CloudDocument, Option<String>)) -> Self {
        Self {
            id: game_doc_id(&game.code),
            rev,
            game,
        }
    }
}

/// CouchDB id of the document holding `code`.
pub fn game_doc_id(code: &GameCode) -> String {
    format!("{}{}", GAME_PREFIX, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::{RuleSet, Scoreboard, TeamState};

    #[test]
    fn document_flattens_the_game_beside_couch_metadata() {
        let code = GameCode::parse("LOCAL-AB12C3").unwrap();
        let game = CloudDocument {
            code: code.clone(),
            scoreboard: Scoreboard::new(
                TeamState::new("Hawks", "#aa0000", 0),
                TeamState::new("Owls", "#0000aa", 0),
                RuleSet::default(),
            ),
            created_at: 5,
            last_update: 9,
        };

        let value = serde_json::to_value(CouchGameDocument::from((game.clone(), None))).unwrap();
        assert_eq!(value["_id"], "game::LOCAL-AB12C3");
        assert!(value.get("_rev").is_none());
        assert_eq!(value["lastUpdate"], 9);

        let back: CouchGameDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back.game, game);
    }
}
