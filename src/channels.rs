//! Wires raw [`records::Channel`]/[`records::SchemaHeader`] records together into the owned,
//! reference-counted [`Channel`]/[`Schema`] types used by the readers and writer.

use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{McapError, McapResult};
use crate::records;
use crate::{Channel, Schema};

/// Accumulates schemas and channels as they're encountered in a file, validating that repeated
/// appearances of the same ID carry identical content.
#[derive(Debug, Default)]
pub struct ChannelAccumulator<'a> {
    schemas: HashMap<u16, Arc<Schema<'a>>>,
    channels: HashMap<u16, Arc<Channel<'a>>>,
}

impl<'a> ChannelAccumulator<'a> {
    pub fn add_schema(
        &mut self,
        header: records::SchemaHeader,
        data: Cow<'a, [u8]>,
    ) -> McapResult<()> {
        if header.id == 0 {
            return Err(McapError::InvalidSchemaId);
        }
        match self.schemas.entry(header.id) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.name == header.name
                    && existing.encoding == header.encoding
                    && existing.data == data
                {
                    Ok(())
                } else {
                    Err(McapError::ConflictingSchemas(header.name))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Schema {
                    id: header.id,
                    name: header.name,
                    encoding: header.encoding,
                    data,
                }));
                Ok(())
            }
        }
    }

    pub fn add_channel(&mut self, chan: records::Channel) -> McapResult<()> {
        let schema = if chan.schema_id == 0 {
            None
        } else {
            match self.schemas.get(&chan.schema_id) {
                Some(s) => Some(s.clone()),
                None => return Err(McapError::UnknownSchema(chan.topic, chan.schema_id)),
            }
        };

        match self.channels.entry(chan.id) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.topic == chan.topic
                    && existing.schema.as_ref().map(|s| s.id).unwrap_or(0) == chan.schema_id
                    && existing.message_encoding == chan.message_encoding
                    && existing.metadata == chan.metadata
                {
                    Ok(())
                } else {
                    Err(McapError::ConflictingChannels(chan.topic))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Channel {
                    id: chan.id,
                    topic: chan.topic,
                    schema,
                    message_encoding: chan.message_encoding,
                    metadata: chan.metadata,
                }));
                Ok(())
            }
        }
    }

    pub fn get(&self, channel_id: u16) -> Option<Arc<Channel<'a>>> {
        self.channels.get(&channel_id).cloned()
    }

    pub fn get_schema(&self, schema_id: u16) -> Option<Arc<Schema<'a>>> {
        self.schemas.get(&schema_id).cloned()
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel<'a>>> {
        self.channels.values()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<Schema<'a>>> {
        self.schemas.values()
    }
}
