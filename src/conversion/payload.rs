//! Resolution of out-of-line payloads to their users.
//!
//! A switch or fill-array-data instruction names its payload by a relative offset, and the
//! payload table can appear before or after its user in the instruction stream. Both
//! resolvers accept the two halves in any order: whichever half arrives first is cached
//! until the other one registers.

use std::collections::HashMap;

use crate::{code::InstructionKind, Result};

/// A switch table after resolution against its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSwitch {
    /// Offset of the switch instruction.
    pub user_offset: u32,
    /// Case keys, in table order.
    pub keys: Vec<i32>,
    /// Absolute target offsets, parallel to `keys`.
    pub targets: Vec<u32>,
}

#[derive(Debug, Clone)]
struct SwitchTable {
    keys: Vec<i32>,
    relative_targets: Vec<i32>,
}

/// Pairs switch instructions with their packed or sparse payloads.
#[derive(Debug, Default)]
pub struct SwitchPayloadResolver {
    /// Payload offset to user offset.
    users: HashMap<u32, u32>,
    /// Payload tables seen before their user.
    unresolved: HashMap<u32, SwitchTable>,
    resolved: HashMap<u32, ResolvedSwitch>,
}

impl SwitchPayloadResolver {
    /// Registers a switch instruction at `user_offset` referring to its payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the payload offset lies before the method
    /// start.
    pub fn add_payload_user(&mut self, user_offset: u32, relative_payload: i32) -> Result<u32> {
        let payload_offset = absolute_offset(user_offset, relative_payload)?;
        self.users.insert(payload_offset, user_offset);
        if let Some(table) = self.unresolved.remove(&payload_offset) {
            self.finish(payload_offset, user_offset, table)?;
        }
        Ok(payload_offset)
    }

    /// Registers the payload found at `payload_offset`. Non-switch payloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a resolved target lies before the method start
    /// or the payload is internally inconsistent.
    pub fn resolve(&mut self, payload_offset: u32, payload: &InstructionKind) -> Result<()> {
        let table = match payload {
            InstructionKind::PackedSwitchPayload { first_key, targets } => SwitchTable {
                keys: (0..targets.len())
                    .map(|i| first_key.wrapping_add(i as i32))
                    .collect(),
                relative_targets: targets.clone(),
            },
            InstructionKind::SparseSwitchPayload { keys, targets } => {
                if keys.len() != targets.len() {
                    return Err(malformed_error!(
                        "Sparse switch payload at {:#x} has {} keys and {} targets",
                        payload_offset,
                        keys.len(),
                        targets.len()
                    ));
                }
                SwitchTable {
                    keys: keys.clone(),
                    relative_targets: targets.clone(),
                }
            }
            _ => return Ok(()),
        };

        match self.users.get(&payload_offset).copied() {
            Some(user_offset) => self.finish(payload_offset, user_offset, table),
            None => {
                self.unresolved.insert(payload_offset, table);
                Ok(())
            }
        }
    }

    fn finish(&mut self, payload_offset: u32, user_offset: u32, table: SwitchTable) -> Result<()> {
        let targets = table
            .relative_targets
            .iter()
            .map(|&relative| absolute_offset(user_offset, relative))
            .collect::<Result<Vec<_>>>()?;
        self.resolved.insert(
            payload_offset,
            ResolvedSwitch {
                user_offset,
                keys: table.keys,
                targets,
            },
        );
        Ok(())
    }

    /// The resolved table of the payload at `payload_offset`.
    #[must_use]
    pub fn get(&self, payload_offset: u32) -> Option<&ResolvedSwitch> {
        self.resolved.get(&payload_offset)
    }

    /// Absolute targets of the payload at `payload_offset`.
    #[must_use]
    pub fn absolute_targets(&self, payload_offset: u32) -> Option<&[u32]> {
        self.get(payload_offset).map(|table| table.targets.as_slice())
    }

    /// Case keys of the payload at `payload_offset`.
    #[must_use]
    pub fn keys(&self, payload_offset: u32) -> Option<&[i32]> {
        self.get(payload_offset).map(|table| table.keys.as_slice())
    }

    /// Returns `true` while some payload or user is still waiting for its other half.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.unresolved.is_empty() || self.users.keys().any(|p| !self.resolved.contains_key(p))
    }
}

/// The constant data of a fill-array-data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayFilledData {
    /// Offset of the fill-array-data instruction.
    pub user_offset: u32,
    /// Width of one element in bytes.
    pub element_width: u16,
    /// Number of elements.
    pub size: usize,
    /// Raw little-endian element bytes.
    pub data: Vec<u8>,
}

/// Pairs fill-array-data instructions with their payloads.
#[derive(Debug, Default)]
pub struct ArrayFilledDataPayloadResolver {
    users: HashMap<u32, u32>,
    unresolved: HashMap<u32, (u16, Vec<u8>)>,
    resolved: HashMap<u32, ArrayFilledData>,
}

impl ArrayFilledDataPayloadResolver {
    /// Registers a fill-array-data instruction at `user_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the payload offset lies before the method
    /// start.
    pub fn add_payload_user(&mut self, user_offset: u32, relative_payload: i32) -> Result<u32> {
        let payload_offset = absolute_offset(user_offset, relative_payload)?;
        self.users.insert(payload_offset, user_offset);
        if let Some((element_width, data)) = self.unresolved.remove(&payload_offset) {
            self.finish(payload_offset, user_offset, element_width, data)?;
        }
        Ok(payload_offset)
    }

    /// Registers the payload found at `payload_offset`. Other payloads are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a zero element width or a data length that is
    /// not a multiple of it.
    pub fn resolve(&mut self, payload_offset: u32, payload: &InstructionKind) -> Result<()> {
        let InstructionKind::FillArrayDataPayload {
            element_width,
            data,
        } = payload
        else {
            return Ok(());
        };

        match self.users.get(&payload_offset).copied() {
            Some(user_offset) => {
                self.finish(payload_offset, user_offset, *element_width, data.clone())
            }
            None => {
                self.unresolved
                    .insert(payload_offset, (*element_width, data.clone()));
                Ok(())
            }
        }
    }

    fn finish(
        &mut self,
        payload_offset: u32,
        user_offset: u32,
        element_width: u16,
        data: Vec<u8>,
    ) -> Result<()> {
        let width = usize::from(element_width);
        if width == 0 || data.len() % width != 0 {
            return Err(malformed_error!(
                "Fill-array-data payload at {:#x} has {} bytes for element width {}",
                payload_offset,
                data.len(),
                element_width
            ));
        }
        self.resolved.insert(
            payload_offset,
            ArrayFilledData {
                user_offset,
                element_width,
                size: data.len() / width,
                data,
            },
        );
        Ok(())
    }

    /// The resolved data of the payload at `payload_offset`.
    #[must_use]
    pub fn get(&self, payload_offset: u32) -> Option<&ArrayFilledData> {
        self.resolved.get(&payload_offset)
    }
}

/// Adds a relative code-unit offset to an instruction offset.
pub(crate) fn absolute_offset(offset: u32, relative: i32) -> Result<u32> {
    offset.checked_add_signed(relative).ok_or_else(|| {
        malformed_error!(
            "Relative offset {} from {:#x} leaves the method",
            relative,
            offset
        )
    })
}
