//! Fraud ring scan
//!
//! Reads a relationship snapshot (JSON) and prints every ring found as a
//! JSON array on stdout.
//!
//! ```text
//! ring-scan snapshot.json
//! ```
//!
//! Snapshot format:
//!
//! ```json
//! {
//!   "actors": ["alice", "bob", "carol"],
//!   "relationships": [
//!     { "from": "alice", "to": "bob", "kind": "shared_device" }
//!   ]
//! }
//! ```

use anyhow::{bail, Context, Result};
use fraud_risk_engine::{RelationKind, RelationshipGraphBuilder};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    actors: Vec<String>,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    from: String,
    to: String,
    kind: RelationKind,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: ring-scan <snapshot.json>");
    };

    info!(path = %path, "Loading relationship snapshot");
    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let snapshot: Snapshot =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;

    let mut builder = RelationshipGraphBuilder::new();
    for actor in &snapshot.actors {
        builder.actor(actor);
    }
    for rel in &snapshot.relationships {
        builder.relate(&rel.from, &rel.to, rel.kind);
    }

    let rings = builder.detect().context("fraud ring detection failed")?;
    info!(
        actors = builder.actor_count(),
        rings = rings.len(),
        "Scan finished"
    );

    println!("{}", serde_json::to_string_pretty(&rings)?);
    Ok(())
}
