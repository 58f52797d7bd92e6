use std::path::Path;

use anyhow::{Context, Result};
use s2dem::structs::command::PriorityTable;
use serde::{Deserialize, Serialize};

/// Dispatch priorities as written in a `--priorities` file.
///
/// ```yaml
/// default: 0
/// classes:
///   - tag: 4
///     priority: -10
///   - tag: 55
///     priority: 5
/// ```
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PriorityFile {
    #[serde(default)]
    default: i32,
    #[serde(default)]
    classes: Vec<PriorityClass>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct PriorityClass {
    tag: u32,
    priority: i32,
}

impl PriorityFile {
    pub fn load(path: &Path) -> Result<PriorityTable> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid priority file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<PriorityTable> {
        let file: PriorityFile = serde_yaml_ng::from_str(text)?;
        let table = PriorityTable::new(
            file.default,
            file.classes.into_iter().map(|c| (c.tag, c.priority)),
        )?;
        Ok(table)
    }
}

impl From<&PriorityTable> for PriorityFile {
    fn from(table: &PriorityTable) -> Self {
        Self {
            default: table.default_priority(),
            classes: table
                .entries()
                .into_iter()
                .map(|(tag, priority)| PriorityClass { tag, priority })
                .collect(),
        }
    }
}

#[test]
fn priority_files() -> anyhow::Result<()> {
    let table = PriorityFile::parse("default: 1\nclasses:\n  - tag: 44\n    priority: -3\n")?;
    assert_eq!(table.priority(44), -3);
    assert_eq!(table.priority(7), 1);

    let defaults = serde_yaml_ng::to_string(&PriorityFile::from(&PriorityTable::default()))?;
    assert_eq!(
        PriorityFile::parse(&defaults)?.entries(),
        PriorityTable::default().entries()
    );

    let duplicate = "classes:\n  - {tag: 4, priority: 1}\n  - {tag: 4, priority: 2}\n";
    assert!(PriorityFile::parse(duplicate).is_err());
    assert!(PriorityFile::parse("weights: []").is_err());
    Ok(())
}
