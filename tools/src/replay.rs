//! Replays captured traffic through a receiver built from the capture alone.

use std::sync::Arc;

use codec::{CodecError, CodecLimits, CodecResult, ReceiveEvent, Received, Receiver};
use schema::{FieldValue, RegistryDescription, TypeRegistry};
use serde::Serialize;
use wire::{decode_message, decode_sections, MessageKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReport {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectReport {
    pub handle: u32,
    pub type_name: String,
    pub fields: Vec<FieldReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListReport {
    pub list_id: u32,
    pub objects: Vec<ObjectReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventReport {
    pub kind: &'static str,
    pub list_id: u32,
    pub handle: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<usize>,
}

impl From<ReceiveEvent> for EventReport {
    fn from(event: ReceiveEvent) -> Self {
        let (kind, list, handle, changed) = match event {
            ReceiveEvent::Created { list, handle } => ("created", list, handle, None),
            ReceiveEvent::Updated {
                list,
                handle,
                changed,
            } => ("updated", list, handle, Some(changed)),
            ReceiveEvent::Destroyed { list, handle } => ("destroyed", list, handle, None),
        };
        Self {
            kind,
            list_id: list.raw(),
            handle: handle.raw(),
            changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub name: String,
    pub bytes: usize,
    pub sequence: u32,
    /// Dropped as no newer than an already applied frame.
    pub stale: bool,
    pub events: Vec<EventReport>,
}

/// Result of replaying a capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub registry: RegistryDescription,
    pub frames: Vec<FrameReport>,
    /// Mirror state after the last frame.
    pub lists: Vec<ListReport>,
}

/// Applies `frames` in order after `registry_message`.
///
/// Resource fields decode to placeholders named `#<index>`. Lists are named
/// by id since captures do not carry list names.
pub fn replay_capture(
    registry_message: &[u8],
    frames: &[(String, Vec<u8>)],
    limits: &wire::Limits,
) -> CodecResult<ReplayReport> {
    let message = decode_message(registry_message, limits)?;
    if message.header.kind != MessageKind::Registry {
        return Err(CodecError::UnexpectedMessage {
            expected: MessageKind::Registry,
            found: message.header.kind,
        });
    }
    let desc = RegistryDescription::decode(message.payload)?;
    let registry = Arc::new(TypeRegistry::from_description(&desc)?);

    let mut receiver = Receiver::with_limits(registry, CodecLimits::unlimited(), limits.clone());
    if let Some(highest) = highest_list_id(frames, limits)? {
        for id in 0..=highest {
            receiver.create_list(format!("list{id}"))?;
        }
    }
    receiver.apply_registry_message(registry_message)?;

    let mut reports = Vec::with_capacity(frames.len());
    for (name, bytes) in frames {
        let sequence = decode_message(bytes, limits)?.header.sequence;
        let (stale, events) = match receiver.apply_message(bytes)? {
            Received::Frame(applied) => (
                false,
                applied.events.into_iter().map(EventReport::from).collect(),
            ),
            Received::Stale { .. } => (true, Vec::new()),
            Received::Registry { .. } => (false, Vec::new()),
        };
        reports.push(FrameReport {
            name: name.clone(),
            bytes: bytes.len(),
            sequence,
            stale,
            events,
        });
    }

    let lists = receiver
        .lists()
        .map(|list| ListReport {
            list_id: list.id().raw(),
            objects: list
                .iter()
                .map(|object| ObjectReport {
                    handle: object.handle().raw(),
                    type_name: object.metadata().name().to_string(),
                    fields: object
                        .metadata()
                        .fields()
                        .iter()
                        .zip(object.values())
                        .map(|(field, value)| FieldReport {
                            name: field.name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Ok(ReplayReport {
        registry: desc,
        frames: reports,
        lists,
    })
}

fn highest_list_id(frames: &[(String, Vec<u8>)], limits: &wire::Limits) -> CodecResult<Option<u32>> {
    let mut highest = None;
    for (_, bytes) in frames {
        let message = decode_message(bytes, limits)?;
        if message.header.kind != MessageKind::Frame {
            continue;
        }
        for section in decode_sections(message.payload, limits)? {
            highest = highest.max(Some(section.list_id));
        }
    }
    Ok(highest)
}

/// Human-readable rendering of a [`ReplayReport`].
pub fn format_replay_pretty(report: &ReplayReport) -> String {
    let mut out = String::new();
    for frame in &report.frames {
        let status = if frame.stale { " (stale)" } else { "" };
        out.push_str(&format!(
            "{} seq {} {} bytes{status}\n",
            frame.name, frame.sequence, frame.bytes
        ));
        for event in &frame.events {
            match event.changed {
                Some(changed) => out.push_str(&format!(
                    "  {} list {} #{} ({changed} fields)\n",
                    event.kind, event.list_id, event.handle
                )),
                None => out.push_str(&format!(
                    "  {} list {} #{}\n",
                    event.kind, event.list_id, event.handle
                )),
            }
        }
    }
    for list in &report.lists {
        out.push_str(&format!("list {}: {} objects\n", list.list_id, list.objects.len()));
        for object in &list.objects {
            let fields: Vec<String> = object
                .fields
                .iter()
                .map(|field| format!("{}={:?}", field.name, field.value))
                .collect();
            out.push_str(&format!(
                "  #{} {} {}\n",
                object.handle,
                object.type_name,
                fields.join(" ")
            ));
        }
    }
    out
}
