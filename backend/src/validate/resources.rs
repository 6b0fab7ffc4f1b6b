//! Declared resource accounting for Terraform templates
//!
//! Demand is extracted heuristically: any declaration or resource attribute
//! whose name contains `ram` or `mem` is RAM in MB, and one containing
//! `cpu`, `core` or `vcpus` is CPU in whole vCPUs. Resource attributes may
//! reference `var.<name>` or `local.<name>`; a referenced declaration is
//! counted through the attribute (times `count`) and not again on its own.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::models::validation::ValidationRequest;

static VARIABLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bvariable\s+"([^"]+)"\s*\{"#).unwrap());

static LOCALS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\blocals\s*\{").unwrap());

static RESOURCE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bresource\s+"([^"]+)"\s+"([^"]+)"\s*\{"#).unwrap());

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(?:^|[\s{;,])([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*(?:(\d+)\b|"\$\{\s*(var|local)\.([A-Za-z0-9_-]+)\s*\}"|(var|local)\.([A-Za-z0-9_-]+)\b)"#,
    )
    .unwrap()
});

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(var|local)\.([A-Za-z0-9_-]+)").unwrap());

/// Resource class of a declared quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Ram,
    Cpu,
}

/// Classify a name by substring
pub fn classify(name: &str) -> Option<ResourceKind> {
    let name = name.to_lowercase();
    if name.contains("ram") || name.contains("mem") {
        Some(ResourceKind::Ram)
    } else if name.contains("cpu") || name.contains("core") || name.contains("vcpus") {
        Some(ResourceKind::Cpu)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Var,
    Local,
}

impl Scope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "var" => Some(Scope::Var),
            "local" => Some(Scope::Local),
            _ => None,
        }
    }
}

/// Right-hand side of a numeric assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quantity {
    Literal(i64),
    Ref(Scope, String),
}

/// A numeric `variable` default or `locals` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub scope: Scope,
    pub name: String,
    pub value: i64,
}

/// A resource-classified attribute of a resource block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub resource: String,
    pub name: String,
    pub kind: ResourceKind,
    pub value: Quantity,
    pub count: Quantity,
}

/// Everything extracted from one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileScan {
    pub declarations: Vec<Declaration>,
    pub attributes: Vec<Attribute>,
    pub references: Vec<(Scope, String)>,
}

/// Total demand of a group of files
///
/// Sums saturate, so absurdly large declarations stay absurdly large.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceDemand {
    pub ram_mb: i64,
    pub cpu: i64,
}

impl ResourceDemand {
    fn add(&mut self, kind: ResourceKind, value: i64) {
        match kind {
            ResourceKind::Ram => self.ram_mb = self.ram_mb.saturating_add(value),
            ResourceKind::Cpu => self.cpu = self.cpu.saturating_add(value),
        }
    }
}

/// Extract declarations and resource attributes from one file
pub fn scan_file(filename: &str, content: &str) -> FileScan {
    if filename.to_lowercase().ends_with(".tf.json") {
        match serde_json::from_str::<Json>(content) {
            Ok(root) => scan_json(&root),
            Err(e) => {
                warn!("Skipping resource accounting for {}: {}", filename, e);
                FileScan::default()
            }
        }
    } else {
        scan_hcl(content)
    }
}

fn scan_hcl(content: &str) -> FileScan {
    let source = strip_comments(content);
    let mut scan = FileScan::default();

    for caps in REFERENCE.captures_iter(&source) {
        if let Some(scope) = Scope::parse(&caps[1]) {
            scan.references.push((scope, caps[2].to_lowercase()));
        }
    }

    for caps in VARIABLE_BLOCK.captures_iter(&source) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(body) = block_body(&source, whole.end() - 1) else {
            continue;
        };
        let default = assignments(body)
            .into_iter()
            .find(|(name, _)| name == "default");
        if let Some((_, Quantity::Literal(value))) = default {
            scan.declarations.push(Declaration {
                scope: Scope::Var,
                name: caps[1].to_lowercase(),
                value,
            });
        }
    }

    for whole in LOCALS_BLOCK.find_iter(&source) {
        let Some(body) = block_body(&source, whole.end() - 1) else {
            continue;
        };
        for (name, quantity) in assignments(body) {
            if let Quantity::Literal(value) = quantity {
                scan.declarations.push(Declaration {
                    scope: Scope::Local,
                    name,
                    value,
                });
            }
        }
    }

    for caps in RESOURCE_BLOCK.captures_iter(&source) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(body) = block_body(&source, whole.end() - 1) else {
            continue;
        };
        let resource = format!("{}.{}", &caps[1], &caps[2]);
        let pairs = assignments(body);
        let count = pairs
            .iter()
            .find(|(name, _)| name == "count")
            .map(|(_, q)| q.clone())
            .unwrap_or(Quantity::Literal(1));

        for (name, value) in pairs {
            if name == "count" {
                continue;
            }
            if let Some(kind) = classify(&name) {
                scan.attributes.push(Attribute {
                    resource: resource.clone(),
                    name,
                    kind,
                    value,
                    count: count.clone(),
                });
            }
        }
    }

    scan
}

fn scan_json(root: &Json) -> FileScan {
    let mut scan = FileScan::default();

    if let Some(variables) = root.get("variable").and_then(Json::as_object) {
        for (name, body) in variables {
            if let Some(value) = body.get("default").and_then(json_int) {
                scan.declarations.push(Declaration {
                    scope: Scope::Var,
                    name: name.to_lowercase(),
                    value,
                });
            }
        }
    }

    if let Some(locals) = root.get("locals").and_then(Json::as_object) {
        for (name, value) in locals {
            if let Some(value) = json_int(value) {
                scan.declarations.push(Declaration {
                    scope: Scope::Local,
                    name: name.to_lowercase(),
                    value,
                });
            }
        }
    }

    if let Some(types) = root.get("resource").and_then(Json::as_object) {
        for (kind_name, instances) in types {
            let Some(instances) = instances.as_object() else {
                continue;
            };
            for (instance, body) in instances {
                let Some(body) = body.as_object() else { continue };
                let count = body
                    .get("count")
                    .and_then(json_quantity)
                    .unwrap_or(Quantity::Literal(1));
                for (name, value) in body {
                    let name = name.to_lowercase();
                    if name == "count" {
                        continue;
                    }
                    let (Some(kind), Some(value)) = (classify(&name), json_quantity(value)) else {
                        continue;
                    };
                    scan.attributes.push(Attribute {
                        resource: format!("{}.{}", kind_name, instance),
                        name,
                        kind,
                        value,
                        count: count.clone(),
                    });
                }
            }
        }
    }

    for attr in &scan.attributes {
        for quantity in [&attr.value, &attr.count] {
            if let Quantity::Ref(scope, name) = quantity {
                scan.references.push((*scope, name.clone()));
            }
        }
    }

    scan
}

fn json_int(value: &Json) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

fn json_quantity(value: &Json) -> Option<Quantity> {
    if let Some(n) = json_int(value) {
        return Some(Quantity::Literal(n));
    }
    let text = value.as_str()?.trim();
    let inner = text
        .strip_prefix("${")
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text)
        .trim();
    let (scope, name) = inner.split_once('.')?;
    let scope = Scope::parse(scope)?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    Some(Quantity::Ref(scope, name.to_lowercase()))
}

/// Numeric or reference assignments inside a block body
fn assignments(body: &str) -> Vec<(String, Quantity)> {
    ATTRIBUTE
        .captures_iter(body)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase();
            let quantity = if let Some(n) = caps.get(2) {
                Quantity::Literal(n.as_str().parse().ok()?)
            } else if let (Some(scope), Some(target)) = (caps.get(3), caps.get(4)) {
                Quantity::Ref(Scope::parse(scope.as_str())?, target.as_str().to_lowercase())
            } else {
                let scope = Scope::parse(caps.get(5)?.as_str())?;
                Quantity::Ref(scope, caps.get(6)?.as_str().to_lowercase())
            };
            Some((name, quantity))
        })
        .collect()
}

/// Remove `#`, `//` and `/* */` comments, leaving strings intact
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '#' => skip_line(&mut chars, &mut out),
            '/' if chars.peek() == Some(&'/') => skip_line(&mut chars, &mut out),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    for c in chars.by_ref() {
        if c == '\n' {
            out.push('\n');
            break;
        }
    }
}

/// Body between the brace at `open` and its matching close, skipping strings
fn block_body(source: &str, open: usize) -> Option<&str> {
    if source.as_bytes().get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in source[open..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&source[open + 1..open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Resource accounting over a whole template set
///
/// The last file of the set is the one being saved; all earlier files are
/// already-declared demand.
pub struct ResourceAccounting {
    scans: Vec<FileScan>,
}

impl ResourceAccounting {
    pub fn new(files: &[ValidationRequest]) -> Self {
        let scans = files
            .iter()
            .map(|f| {
                let scan = scan_file(&f.filename, &f.content);
                debug!(
                    "Scanned {}: {} declarations, {} resource attributes",
                    f.filename,
                    scan.declarations.len(),
                    scan.attributes.len()
                );
                scan
            })
            .collect();
        let accounting = Self { scans };
        accounting.warn_undeclared();
        accounting
    }

    /// Demand of the current (last) file and of all other files
    pub fn current_and_others(&self) -> (ResourceDemand, ResourceDemand) {
        let Some(last) = self.scans.len().checked_sub(1) else {
            return (ResourceDemand::default(), ResourceDemand::default());
        };
        (
            self.demand(|i| i == last),
            self.demand(|i| i != last),
        )
    }

    /// Demand of the files selected by `include`
    pub fn demand(&self, include: impl Fn(usize) -> bool) -> ResourceDemand {
        let consumed = self.consumed();
        let mut demand = ResourceDemand::default();

        for (index, scan) in self.scans.iter().enumerate() {
            if !include(index) {
                continue;
            }
            for attr in &scan.attributes {
                let (Some(value), Some(count)) = (
                    self.resolve(index, &attr.value),
                    self.resolve(index, &attr.count),
                ) else {
                    continue;
                };
                debug!("{}.{} = {} x {}", attr.resource, attr.name, value, count);
                demand.add(attr.kind, value.saturating_mul(count));
            }
            for decl in &scan.declarations {
                if consumed.contains(&(decl.scope, decl.name.clone())) {
                    continue;
                }
                if let Some(kind) = classify(&decl.name) {
                    demand.add(kind, decl.value);
                }
            }
        }
        demand
    }

    /// Declared names with more than one distinct value across the set
    pub fn conflicts(&self) -> Vec<String> {
        let mut values: HashMap<&str, HashSet<i64>> = HashMap::new();
        let mut conflicts = Vec::new();
        for decl in self.scans.iter().flat_map(|s| &s.declarations) {
            let seen = values.entry(decl.name.as_str()).or_default();
            seen.insert(decl.value);
            if seen.len() > 1 && !conflicts.contains(&decl.name) {
                warn!("Conflicting values declared for {}", decl.name);
                conflicts.push(decl.name.clone());
            }
        }
        conflicts
    }

    /// Declarations referenced by some resource attribute of the set
    fn consumed(&self) -> HashSet<(Scope, String)> {
        self.scans
            .iter()
            .flat_map(|s| &s.attributes)
            .flat_map(|a| [&a.value, &a.count])
            .filter_map(|q| match q {
                Quantity::Ref(scope, name) => Some((*scope, name.clone())),
                Quantity::Literal(_) => None,
            })
            .collect()
    }

    /// Value of a quantity, preferring a declaration in the same file
    fn resolve(&self, file: usize, quantity: &Quantity) -> Option<i64> {
        match quantity {
            Quantity::Literal(n) => Some(*n),
            Quantity::Ref(scope, name) => {
                let lookup = |scan: &FileScan| {
                    scan.declarations
                        .iter()
                        .find(|d| d.scope == *scope && d.name == *name)
                        .map(|d| d.value)
                };
                self.scans
                    .get(file)
                    .and_then(lookup)
                    .or_else(|| self.scans.iter().find_map(lookup))
            }
        }
    }

    fn warn_undeclared(&self) {
        let declared: HashSet<(Scope, &str)> = self
            .scans
            .iter()
            .flat_map(|s| &s.declarations)
            .map(|d| (d.scope, d.name.as_str()))
            .collect();
        let undeclared: BTreeMap<&str, Scope> = self
            .scans
            .iter()
            .flat_map(|s| &s.references)
            .filter(|(scope, name)| *scope == Scope::Var && !declared.contains(&(*scope, name.as_str())))
            .map(|(scope, name)| (name.as_str(), *scope))
            .collect();
        for name in undeclared.keys() {
            warn!("Variable var.{} is used without a numeric declaration", name);
        }
    }
}

/// Live capacity of a target server
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacitySnapshot {
    pub total_ram_mb: i64,
    pub used_ram_mb: i64,
    pub free_cpu_percent: f64,
}

/// Check the marginal demand of the current file against a server
///
/// Returns the rejection message when the demand does not fit.
pub fn check_capacity(
    capacity: &CapacitySnapshot,
    current: &ResourceDemand,
    others: &ResourceDemand,
) -> Option<String> {
    let available_ram = capacity
        .total_ram_mb
        .saturating_sub(capacity.used_ram_mb)
        .saturating_sub(others.ram_mb);
    if current.ram_mb > available_ram {
        return Some(format!(
            "Insufficient RAM: requires {} MB, available {} MB (total {}, used by system {}, reserved by other files {})",
            current.ram_mb, available_ram, capacity.total_ram_mb, capacity.used_ram_mb, others.ram_mb
        ));
    }

    let current_cpu_percent = current.cpu.saturating_mul(100);
    let others_cpu_percent = others.cpu.saturating_mul(100);
    let available_cpu = capacity.free_cpu_percent - others_cpu_percent as f64;
    if current_cpu_percent as f64 > available_cpu {
        return Some(format!(
            "Insufficient CPU: requires {} vCPU (~{}%), available ~{:.1}% (total 100%, reserved by other files ~{:.1}%)",
            current.cpu,
            current_cpu_percent,
            available_cpu,
            others_cpu_percent as f64
        ));
    }
    None
}
