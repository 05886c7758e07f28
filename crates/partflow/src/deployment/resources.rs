//! Validation of deployed resources.
//!
//! Resources are not executed, only inspected: a BPMN resource must declare
//! at least one `process` element with an `id`, a DMN resource at least one
//! `decision`. The first `taskDefinition type="..."` of a BPMN resource is
//! recorded as the job type its instances start with.

use std::collections::BTreeSet;

use crate::record::DeploymentResource;

const BPMN_SUFFIX: &str = ".bpmn";
const DMN_SUFFIX: &str = ".dmn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedProcess {
    pub bpmn_process_id: String,
    pub resource_name: String,
    pub job_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedDecision {
    pub decision_id: String,
    pub resource_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ParsedResources {
    pub processes: Vec<ParsedProcess>,
    pub decisions: Vec<ParsedDecision>,
}

/// Inspect the resources of a deployment. The error is the rejection reason.
pub(crate) fn parse_resources(
    resources: &[DeploymentResource],
) -> Result<ParsedResources, String> {
    if resources.is_empty() {
        return Err("Expected to deploy at least one resource, but none given".to_string());
    }

    let mut parsed = ParsedResources::default();
    let mut process_ids = BTreeSet::new();
    let mut decision_ids = BTreeSet::new();

    for resource in resources {
        let name = &resource.resource_name;
        if resource.resource.trim().is_empty() {
            return Err(format!("Expected resource '{name}' to have content, but it is empty"));
        }

        if name.ends_with(BPMN_SUFFIX) {
            let ids = attribute_values(&resource.resource, "process", "id");
            if ids.is_empty() {
                return Err(format!(
                    "Expected to find at least one process in resource '{name}', but none found"
                ));
            }
            let job_type = attribute_values(&resource.resource, "taskDefinition", "type")
                .into_iter()
                .next();
            for id in ids {
                if !process_ids.insert(id.clone()) {
                    return Err(format!(
                        "Expected the process ids to be unique within a deployment, but found duplicated process id '{id}'"
                    ));
                }
                parsed.processes.push(ParsedProcess {
                    bpmn_process_id: id,
                    resource_name: name.clone(),
                    job_type: job_type.clone(),
                });
            }
        } else if name.ends_with(DMN_SUFFIX) {
            let ids = attribute_values(&resource.resource, "decision", "id");
            if ids.is_empty() {
                return Err(format!(
                    "Expected to find at least one decision in resource '{name}', but none found"
                ));
            }
            for id in ids {
                if !decision_ids.insert(id.clone()) {
                    return Err(format!(
                        "Expected the decision ids to be unique within a deployment, but found duplicated decision id '{id}'"
                    ));
                }
                parsed.decisions.push(ParsedDecision {
                    decision_id: id,
                    resource_name: name.clone(),
                });
            }
        } else {
            return Err(format!(
                "Expected to deploy resources ending with '{BPMN_SUFFIX}' or '{DMN_SUFFIX}', but got '{name}'"
            ));
        }
    }

    Ok(parsed)
}

/// Values of `attribute` on every `element` start tag, ignoring namespace prefixes.
///
/// Comments, processing instructions, CDATA sections and declarations are
/// skipped. A `>` inside a quoted attribute value does not end the tag.
fn attribute_values(xml: &str, element: &str, attribute: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];

        let skipped = [("!--", "-->"), ("?", "?>"), ("![CDATA[", "]]>"), ("!", ">")]
            .into_iter()
            .find(|(open, _)| rest.starts_with(open));
        if let Some((open, close)) = skipped {
            match rest[open.len()..].find(close) {
                Some(end) => rest = &rest[open.len() + end + close.len()..],
                None => break,
            }
            continue;
        }

        let Some(end) = tag_end(rest) else {
            break;
        };
        let tag = &rest[..end];
        rest = &rest[end + 1..];

        let name_end = tag
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(tag.len());
        let name = &tag[..name_end];
        let local_name = name.rsplit(':').next().unwrap_or(name);
        if local_name != element {
            continue;
        }
        if let Some(value) = attribute_value(&tag[name_end..], attribute) {
            values.push(value.to_string());
        }
    }
    values
}

/// Index of the `>` closing a tag, ignoring any inside quoted values.
fn tag_end(tag: &str) -> Option<usize> {
    let mut quote = None;
    for (index, c) in tag.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, '>') => return Some(index),
            _ => {}
        }
    }
    None
}

fn attribute_value<'a>(attributes: &'a str, attribute: &str) -> Option<&'a str> {
    let mut rest = attributes;
    loop {
        let trimmed = rest.trim_start();
        let eq = trimmed.find('=')?;
        let name = trimmed[..eq].trim();
        let after = trimmed[eq + 1..].trim_start();
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value_end = after[1..].find(quote)?;
        let value = &after[1..1 + value_end];
        if name == attribute {
            return Some(value);
        }
        rest = &after[value_end + 2..];
    }
}
