//! Output encoding.

use appgen_core::object::API_VERSION;
use appgen_core::{Error, GeneratedObject, Result};
use serde::Serialize;
use std::io::Write;

/// Serializes the generated objects for the platform.
pub trait ObjectEncoder {
    fn encode(&self, objects: &[GeneratedObject], out: &mut dyn Write) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct List<'a> {
    kind: &'static str,
    api_version: &'static str,
    items: &'a [GeneratedObject],
}

/// Wraps the objects in a versioned `List` envelope, as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonListEncoder {
    pub pretty: bool,
}

impl ObjectEncoder for JsonListEncoder {
    fn encode(&self, objects: &[GeneratedObject], out: &mut dyn Write) -> Result<()> {
        let list = List {
            kind: "List",
            api_version: API_VERSION,
            items: objects,
        };
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(&list)
        } else {
            serde_json::to_vec(&list)
        }
        .map_err(|e| Error::Encode(e.to_string()))?;

        out.write_all(&encoded)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}
