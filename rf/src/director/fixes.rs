//! Applying technical QC fixes to a plan
//!
//! Fixes address a sequence by order and a field by name. Field names are
//! accepted in camelCase or snake_case, with dotted paths for nested fields
//! (`background.reuseFrom`). Fixes that cannot be applied are skipped and
//! reported, never fatal.

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Plan, QcFix, Sequence};

/// Fields that are derived, runtime-only, or identify the sequence
const PROTECTED_FIELDS: &[&str] = &[
    "order",
    "type",
    "startOffsetSec",
    "status",
    "cost",
    "error",
    "errorKind",
    "assets",
    "qualityWarnings",
];

/// Optional nested fields that may be added even when absent
const OPTIONAL_FIELDS: &[&str] = &["reuseFrom"];

/// What happened to a batch of fixes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixReport {
    pub applied: usize,
    pub skipped: Vec<String>,
}

/// Apply every fix that carries a value, then recompute derived fields
pub fn apply_fixes(plan: &mut Plan, fixes: &[QcFix]) -> FixReport {
    debug!(fix_count = fixes.len(), "apply_fixes: called");
    let mut report = FixReport::default();

    for fix in fixes {
        let Some(value) = &fix.suggested_value else {
            debug!(order = fix.sequence_order, field = %fix.field, "apply_fixes: advisory only, no value");
            continue;
        };

        let path: Vec<String> = fix.field.split('.').map(snake_to_camel).collect();
        let result = match path.first() {
            None => Err("empty field name".to_string()),
            Some(head) if PROTECTED_FIELDS.contains(&head.as_str()) => Err(format!("'{}' is not editable", fix.field)),
            Some(_) => match plan.sequence_mut(fix.sequence_order) {
                Some(seq) => apply_one(seq, &path, value.clone()),
                None => Err(format!("no sequence with order {}", fix.sequence_order)),
            },
        };

        match result {
            Ok(()) => {
                debug!(order = fix.sequence_order, field = %fix.field, "apply_fixes: applied");
                report.applied += 1;
            }
            Err(reason) => {
                warn!(order = fix.sequence_order, field = %fix.field, %reason, "apply_fixes: skipping fix");
                report
                    .skipped
                    .push(format!("sequence {} {}: {}", fix.sequence_order, fix.field, reason));
            }
        }
    }

    plan.recompute();
    report
}

/// Set one field through the sequence's JSON form
fn apply_one(seq: &mut Sequence, path: &[String], value: Value) -> Result<(), String> {
    let mut json = serde_json::to_value(&*seq).map_err(|e| e.to_string())?;

    let (leaf, parents) = path.split_last().ok_or_else(|| "empty field name".to_string())?;
    let mut target = &mut json;
    for segment in parents {
        target = target
            .get_mut(segment.as_str())
            .filter(|v| v.is_object())
            .ok_or_else(|| format!("unknown field '{}'", segment))?;
    }
    let object = target
        .as_object_mut()
        .ok_or_else(|| "field parent is not an object".to_string())?;

    if !object.contains_key(leaf.as_str()) && !OPTIONAL_FIELDS.contains(&leaf.as_str()) {
        return Err(format!("unknown field '{}' for {}", leaf, seq.kind.name()));
    }
    if value.is_null() {
        object.remove(leaf.as_str());
    } else {
        object.insert(leaf.clone(), value);
    }

    let updated: Sequence = serde_json::from_value(json).map_err(|e| format!("invalid value: {}", e))?;
    *seq = updated;
    Ok(())
}

/// `duration_sec` → `durationSec`; camelCase input is returned unchanged
fn snake_to_camel(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper = false;
    for c in segment.trim().chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Background, SequenceKind};
    use serde_json::json;

    fn plan() -> Plan {
        Plan::new(vec![
            Sequence::new(1, 4.0, SequenceKind::Impact { text: "ROLL".to_string() }),
            Sequence::new(
                2,
                3.0,
                SequenceKind::Dialogue {
                    speaker: "Aria".to_string(),
                    line: "Now!".to_string(),
                    expression: "fierce".to_string(),
                    background: Background::new("bridge"),
                },
            ),
            Sequence::new(3, 2.0, SequenceKind::Impact { text: "NAT 20".to_string() }),
            Sequence::new(4, 2.0, SequenceKind::Impact { text: "BOOM".to_string() }),
        ])
    }

    fn fix(order: u32, field: &str, value: Option<Value>) -> QcFix {
        QcFix {
            sequence_order: order,
            field: field.to_string(),
            suggested_value: value,
            issue: "test".to_string(),
        }
    }

    #[test]
    fn test_duration_fix_shifts_later_offsets() {
        let mut plan = plan();
        let before_total = plan.total_duration_sec;
        let before: Vec<f64> = plan.sequences.iter().map(|s| s.start_offset_sec).collect();

        let report = apply_fixes(&mut plan, &[fix(2, "durationSec", Some(json!(5)))]);

        assert_eq!(report.applied, 1);
        assert_eq!(plan.total_duration_sec, before_total + 2.0);
        let after: Vec<f64> = plan.sequences.iter().map(|s| s.start_offset_sec).collect();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[1]);
        assert_eq!(after[2], before[2] + 2.0);
        assert_eq!(after[3], before[3] + 2.0);
    }

    #[test]
    fn test_snake_case_and_nested_fields() {
        let mut plan = plan();
        let report = apply_fixes(
            &mut plan,
            &[
                fix(2, "duration_sec", Some(json!(6.5))),
                fix(2, "background.reuse_from", Some(json!(1))),
                fix(2, "line", Some(json!("Hold the line!"))),
            ],
        );
        assert_eq!(report.applied, 3);
        let seq = plan.sequence(2).unwrap();
        assert_eq!(seq.duration_sec, 6.5);
        assert!(seq.kind.reuses_background());
        assert!(matches!(&seq.kind, SequenceKind::Dialogue { line, .. } if line == "Hold the line!"));
    }

    #[test]
    fn test_skips_protected_unknown_and_invalid() {
        let mut plan = plan();
        let original = plan.clone();
        let report = apply_fixes(
            &mut plan,
            &[
                fix(2, "order", Some(json!(9))),
                fix(2, "startOffsetSec", Some(json!(100))),
                fix(9, "durationSec", Some(json!(1))),
                fix(1, "speaker", Some(json!("Bob"))),
                fix(2, "durationSec", Some(json!("long"))),
                fix(2, "durationSec", None),
            ],
        );
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped.len(), 5);
        assert_eq!(plan, original);
    }

    #[test]
    fn test_fixes_are_idempotent() {
        let mut once = plan();
        let fixes = [fix(3, "durationSec", Some(json!(4)))];
        apply_fixes(&mut once, &fixes);
        let mut twice = once.clone();
        apply_fixes(&mut twice, &fixes);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("duration_sec"), "durationSec");
        assert_eq!(snake_to_camel("durationSec"), "durationSec");
        assert_eq!(snake_to_camel("frame_count"), "frameCount");
        assert_eq!(snake_to_camel("_private"), "private");
    }
}
