// ============================================================================
// CHART IDENTITY RENDERING
// ============================================================================
// Turns a chart identity (template + instance-by-label tokens) and the labels
// of one series into a concrete chart ID:
//
//   base = template
//   suffix = "_" + sanitized values of the resolved instance keys, joined "_"
//
// A missing explicit instance label means the series cannot materialize this
// template instance (`Ok(None)`). An empty template is the only hard error.
// ============================================================================

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::error::TemplateError;
use crate::series::LabelView;
use crate::template::{ChartIdentity, InstanceToken};

/// Rendered in place of a blank value when other instance values are not blank
const EMPTY_COMPONENT: &str = "empty";

/// Render the chart instance ID of `identity` for a series with `labels`.
pub fn render_chart_instance_id<L>(identity: &ChartIdentity, labels: &L) -> Result<Option<String>, TemplateError>
where
    L: LabelView + ?Sized,
{
    let base = identity.id_template.as_str();
    if base.trim().is_empty() {
        return Err(TemplateError::Empty);
    }

    let Some(values) = resolve_instance_values(&identity.instance_by_labels, labels) else {
        return Ok(None);
    };

    let mut id = String::from(base);
    if let Some(suffix) = render_suffix(&values) {
        id.push_str(&suffix);
    }
    Ok(Some(id))
}

/// Make a label value safe for use inside a chart ID.
pub fn sanitize_id_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ' ' | '\\' => out.push('_'),
            '\'' => {}
            c => out.push(c),
        }
    }
    out
}

fn render_suffix(values: &[&str]) -> Option<String> {
    if values.is_empty() {
        return None;
    }

    let parts: SmallVec<[String; 4]> = values.iter().map(|v| sanitize_id_component(v)).collect();
    if parts.iter().all(|p| p.trim().is_empty()) {
        // Single-instance charts keep the base ID when every value is blank.
        return None;
    }

    let mut suffix = String::new();
    for part in &parts {
        suffix.push('_');
        if part.trim().is_empty() {
            suffix.push_str(EMPTY_COMPONENT);
        } else {
            suffix.push_str(part);
        }
    }
    Some(suffix)
}

// Resolve the ordered instance label values, or `None` when an explicit key
// is absent. Exclusions only affect tokens that follow them, except for
// `IncludeAll`, which honors every exclusion.
fn resolve_instance_values<'a, L>(tokens: &[InstanceToken], labels: &'a L) -> Option<SmallVec<[&'a str; 4]>>
where
    L: LabelView + ?Sized,
{
    let mut values = SmallVec::new();
    if tokens.is_empty() {
        return Some(values);
    }

    let mut excluded: AHashSet<&str> = AHashSet::new();
    let mut seen: AHashSet<&str> = AHashSet::new();
    let mut include_all = false;

    for token in tokens {
        match token {
            InstanceToken::Exclude(key) => {
                excluded.insert(key.as_str());
            }
            InstanceToken::IncludeAll => include_all = true,
            InstanceToken::Key(key) => {
                let key = key.as_str();
                if excluded.contains(key) || seen.contains(key) {
                    continue;
                }
                let value = labels.get(key)?;
                seen.insert(key);
                values.push(value);
            }
        }
    }

    if include_all {
        // Visitor borrows do not outlive the call; values are looked up again.
        let mut keys: SmallVec<[String; 8]> = SmallVec::new();
        labels.for_each_label(&mut |key, _| {
            if !excluded.contains(key) && !seen.contains(key) {
                keys.push(key.to_string());
            }
            true
        });
        keys.sort_unstable();
        for key in &keys {
            values.push(labels.get(key)?);
        }
    }

    Some(values)
}
