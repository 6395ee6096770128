//! Deterministic debug rendering of stage trees.

use std::fmt::Write as _;

use slotforge_core::id::SlotId;

use crate::expr::EExpr;
use crate::stage::{SortDirection, Stage, StageKind};

/// Placeholder that replaces collection UUIDs in golden output.
pub const UUID_PLACEHOLDER: &str = "<collUUID>";

/// Prints one stage per line, children indented below their parent.
#[derive(Debug, Clone, Copy)]
pub struct DebugPrinter {
    indent: usize,
    plan_node_ids: bool,
}

impl Default for DebugPrinter {
    fn default() -> Self {
        Self {
            indent: 4,
            plan_node_ids: true,
        }
    }
}

fn slots(list: &[SlotId]) -> String {
    let parts: Vec<String> = list.iter().map(|s| s.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn opt_slot(s: &Option<SlotId>) -> String {
    s.map_or_else(|| "none".to_string(), |s| s.to_string())
}

fn opt_num(v: Option<u64>) -> String {
    v.map_or_else(|| "none".to_string(), |v| v.to_string())
}

fn dirs(list: &[SortDirection]) -> String {
    let parts: Vec<&str> = list.iter().map(|d| d.short()).collect();
    format!("[{}]", parts.join(", "))
}

fn assigns(list: &[(SlotId, EExpr)]) -> String {
    let parts: Vec<String> = list.iter().map(|(s, e)| format!("{s} = {e}")).collect();
    parts.join(", ")
}

impl DebugPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Omit `[plan node id]` prefixes.
    pub fn without_plan_node_ids(mut self) -> Self {
        self.plan_node_ids = false;
        self
    }

    pub fn print(&self, stage: &Stage) -> String {
        let mut out = String::new();
        self.write_stage(&mut out, stage, 0);
        out
    }

    fn write_stage(&self, out: &mut String, stage: &Stage, depth: usize) {
        out.push_str(&" ".repeat(depth * self.indent));
        if self.plan_node_ids {
            let _ = write!(out, "[{}] ", stage.plan_node_id);
        }
        out.push_str(stage.name());
        let args = Self::args(stage);
        if !args.is_empty() {
            out.push(' ');
            out.push_str(&args);
        }
        out.push('\n');
        for child in stage.children() {
            self.write_stage(out, child, depth + 1);
        }
    }

    fn args(stage: &Stage) -> String {
        match &stage.kind {
            StageKind::Scan {
                collection,
                uuid,
                rid_slot,
                record_slot,
                fields,
                seek_rid_slot,
                forward,
                partitions,
                ..
            } => {
                let fields: Vec<String> =
                    fields.iter().map(|(f, s)| format!("{f:?} = {s}")).collect();
                let mut s = format!(
                    "{collection} rid={} record={} [{}]",
                    opt_slot(rid_slot),
                    opt_slot(record_slot),
                    fields.join(", ")
                );
                if let Some(seek) = seek_rid_slot {
                    let _ = write!(s, " seek={seek}");
                }
                if let Some(u) = uuid {
                    let _ = write!(s, " @\"{u}\"");
                }
                let _ = write!(s, " {}", if *forward { "forward" } else { "reverse" });
                if let Some(p) = partitions {
                    let _ = write!(s, " partitions={p}");
                }
                s
            }
            StageKind::IndexScan {
                collection,
                uuid,
                index_name,
                rid_slot,
                record_slot,
                key_slots,
                low_key,
                high_key,
                forward,
                ..
            } => {
                let keys: Vec<String> =
                    key_slots.iter().map(|(i, s)| format!("{i}: {s}")).collect();
                let mut s = format!(
                    "{collection}.{index_name} rid={} record={} [{}] low={low_key} high={high_key}",
                    opt_slot(rid_slot),
                    opt_slot(record_slot),
                    keys.join(", ")
                );
                if let Some(u) = uuid {
                    let _ = write!(s, " @\"{u}\"");
                }
                let _ = write!(s, " {}", if *forward { "forward" } else { "reverse" });
                s
            }
            StageKind::CoScan => String::new(),
            StageKind::Filter { predicate, .. } => format!("{{{predicate}}}"),
            StageKind::Project { projections, .. } => assigns(projections),
            StageKind::HashAgg {
                group_slots,
                aggs,
                phase,
                ..
            } => format!("{phase} {} {}", slots(group_slots), assigns(aggs)),
            StageKind::HashJoin {
                join_type,
                outer_keys,
                outer_projects,
                inner_keys,
                inner_projects,
                ..
            } => format!(
                "{join_type} outer {} {} inner {} {}",
                slots(outer_keys),
                slots(outer_projects),
                slots(inner_keys),
                slots(inner_projects)
            ),
            StageKind::MergeJoin {
                outer_keys,
                outer_projects,
                inner_keys,
                inner_projects,
                dirs: d,
                ..
            } => format!(
                "{} outer {} {} inner {} {}",
                dirs(d),
                slots(outer_keys),
                slots(outer_projects),
                slots(inner_keys),
                slots(inner_projects)
            ),
            StageKind::LoopJoin {
                join_type,
                outer_projects,
                correlated,
                predicate,
                ..
            } => {
                let pred = predicate
                    .as_ref()
                    .map_or_else(String::new, |p| format!(" {{{p}}}"));
                format!(
                    "{join_type} {} {}{pred}",
                    slots(outer_projects),
                    slots(correlated)
                )
            }
            StageKind::Sort {
                order_by,
                dirs: d,
                values,
                limit,
                ..
            } => {
                let mut s = format!("{} {} {}", slots(order_by), dirs(d), slots(values));
                if let Some(l) = limit {
                    let _ = write!(s, " limit={l}");
                }
                s
            }
            StageKind::LimitSkip { limit, skip, .. } => {
                format!("{} {}", opt_num(*limit), opt_num(*skip))
            }
            StageKind::Union {
                input_slots,
                output_slots,
                ..
            } => {
                let inputs: Vec<String> = input_slots.iter().map(|l| slots(l)).collect();
                format!("{} [{}]", slots(output_slots), inputs.join(", "))
            }
            StageKind::SortedMerge {
                input_keys,
                dirs: d,
                input_vals,
                output_vals,
                ..
            } => {
                let keys: Vec<String> = input_keys.iter().map(|l| slots(l)).collect();
                let vals: Vec<String> = input_vals.iter().map(|l| slots(l)).collect();
                format!(
                    "[{}] {} [{}] {}",
                    keys.join(", "),
                    dirs(d),
                    vals.join(", "),
                    slots(output_vals)
                )
            }
            StageKind::Unique { keys, .. } => slots(keys),
            StageKind::Unwind {
                input_slot,
                output_slot,
                index_slot,
                preserve_non_arrays,
                ..
            } => format!("{output_slot} {index_slot} {input_slot} {preserve_non_arrays}"),
            StageKind::SpoolEagerProducer { spool_id, vals, .. } => {
                format!("{spool_id} {}", slots(vals))
            }
            StageKind::SpoolLazyProducer {
                spool_id,
                vals,
                predicate,
                ..
            } => format!("{spool_id} {} {{{predicate}}}", slots(vals)),
            StageKind::SpoolConsumer { spool_id, vals, .. } => {
                format!("{spool_id} {}", slots(vals))
            }
            StageKind::Exchange {
                distribution,
                partitions,
                fields,
                partition_slots,
                ..
            } => format!(
                "{} {distribution:?} {} {}",
                partitions,
                slots(fields),
                slots(partition_slots)
            ),
        }
    }
}

fn is_uuid_at(bytes: &[u8], start: usize) -> bool {
    const LEN: usize = 36;
    if start + LEN > bytes.len() {
        return false;
    }
    bytes[start..start + LEN].iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

/// Replace every hyphenated UUID in `text` with `<collUUID>`.
pub fn strip_uuids(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut copied_from = 0;
    while i < bytes.len() {
        if is_uuid_at(bytes, i) {
            out.push_str(&text[copied_from..i]);
            out.push_str(UUID_PLACEHOLDER);
            i += 36;
            copied_from = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&text[copied_from..]);
    out
}
