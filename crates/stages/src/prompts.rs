//! Prompt construction for the analysis stages.

use std::collections::BTreeMap;
use std::fmt::Write;

use agentflow_core::ElementSet;

pub fn documenter_system(tone: &str) -> String {
    format!(
        "You are a senior technical writer producing {tone} documentation \
         for a codebase. Describe what each element does, its parameters \
         and return values, and give short usage examples. Be precise and \
         do not invent behavior that is not implied by the element names."
    )
}

pub fn auditor_system(tone: &str) -> String {
    format!(
        "You are an application security auditor writing a {tone} report. \
         Review the listed code elements and flagged findings, assess their \
         risk, and recommend concrete mitigations. Do not speculate beyond \
         the provided evidence."
    )
}

/// Render the parsed element inventory as a compact prompt section.
pub fn element_inventory(parsed_elements: &BTreeMap<String, ElementSet>) -> String {
    let mut out = String::new();
    for (path, elements) in parsed_elements {
        let _ = writeln!(out, "File: {path}");
        for class in &elements.classes {
            let _ = writeln!(out, "  class {} (line {})", class.name, class.line);
        }
        for method in &elements.methods {
            let _ = writeln!(out, "  method {} (line {})", method.name, method.line);
        }
        for function in &elements.functions {
            let _ = writeln!(out, "  function {} (line {})", function.name, function.line);
        }
        for route in &elements.routes {
            let _ = writeln!(out, "  route {} (line {})", route.name, route.line);
        }
    }
    out
}

pub fn documentation_request(parsed_elements: &BTreeMap<String, ElementSet>) -> String {
    format!(
        "Generate documentation for the following code elements.\n\n{}",
        element_inventory(parsed_elements)
    )
}

pub fn audit_request(
    parsed_elements: &BTreeMap<String, ElementSet>,
    findings: &[String],
) -> String {
    let findings_section = if findings.is_empty() {
        "No heuristic findings.".to_string()
    } else {
        findings.join("\n")
    };
    format!(
        "Audit the following code elements.\n\n{}\nHeuristic findings:\n{}",
        element_inventory(parsed_elements),
        findings_section
    )
}
