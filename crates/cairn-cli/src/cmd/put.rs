use anyhow::{Context as _, Result};
use cairn_core::db::entities::upsert_entity;
use cairn_core::model::{Entity, EntityRef};
use clap::Args;
use serde::Serialize;
use std::io::{Read, Write};

use super::Session;
use crate::output::{pretty_kv, render_mode};

#[derive(Args, Debug)]
pub struct PutArgs {
    /// Entity JSON such as `{"type":"route","object":{...}}`, or an array of
    /// them. `-` reads from stdin.
    pub entity: String,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    stored: Vec<EntityRef>,
}

/// Execute `cairn put`: upsert content entities for the resolver.
///
/// # Errors
///
/// Returns an error if the payload is not entity JSON or a write fails.
pub fn run_put(args: &PutArgs, session: &Session) -> Result<()> {
    let raw = if args.entity == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read entity JSON from stdin")?;
        buf
    } else {
        args.entity.clone()
    };
    let entities = parse_entities(&raw)?;

    let mut conn = session.open_existing()?;
    let tx = conn.transaction().context("begin entity upsert")?;
    for entity in &entities {
        upsert_entity(&tx, entity).with_context(|| format!("store {}", entity.entity_ref()))?;
    }
    tx.commit().context("commit entity upsert")?;

    let output = PutOutput {
        stored: entities.iter().map(Entity::entity_ref).collect(),
    };
    tracing::debug!(count = output.stored.len(), "entities stored");
    render_mode(
        session.output,
        &output,
        |out, w| {
            for entity in &out.stored {
                writeln!(w, "{entity}")?;
            }
            Ok(())
        },
        |out, w| pretty_kv(w, "Stored", format!("{} entity(ies)", out.stored.len())),
    )
}

fn parse_entities(raw: &str) -> Result<Vec<Entity>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("entity payload is not JSON")?;
    if value.is_array() {
        serde_json::from_value(value).context("expected an array of tagged entities")
    } else {
        let entity: Entity =
            serde_json::from_value(value).context("expected a tagged entity")?;
        Ok(vec![entity])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::model::EntityType;

    #[test]
    fn single_and_batched_payloads_parse() {
        let one = parse_entities(r#"{"type":"user","object":{"id":301,"username":"anna"}}"#)
            .expect("single");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].entity_ref(), EntityRef::new(EntityType::User, 301));

        let many = parse_entities(
            r#"[{"type":"area","object":{"id":10,"region_fk":1,"parent_fk":null,"name":"Area"}},
                {"type":"block","object":{"id":601,"area_fk":10,"name":"Block"}}]"#,
        )
        .expect("batch");
        assert_eq!(many.len(), 2);
    }

    #[test]
    fn untagged_payload_is_rejected() {
        assert!(parse_entities(r#"{"id":301,"username":"anna"}"#).is_err());
    }
}
