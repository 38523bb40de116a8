use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheatSheetEntry {
    pub command: String,
    pub description: String,
    pub lesson_id: String,
    pub category: String,
}

/// Commands mastered during a session, in the order they were first learned.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheatSheet {
    entries: Vec<CheatSheetEntry>,
}

impl CheatSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-adding a command replaces its entry without moving it.
    pub fn add(&mut self, entry: CheatSheetEntry) {
        if entry.command.trim().is_empty() {
            return;
        }
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.command == entry.command)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[CheatSheetEntry] {
        &self.entries
    }

    pub fn by_category(&self) -> Vec<(&str, Vec<&CheatSheetEntry>)> {
        let mut groups: Vec<(&str, Vec<&CheatSheetEntry>)> = Vec::new();
        for entry in &self.entries {
            match groups
                .iter_mut()
                .find(|(category, _)| *category == entry.category)
            {
                Some((_, members)) => members.push(entry),
                None => groups.push((entry.category.as_str(), vec![entry])),
            }
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(command: &str, description: &str, category: &str) -> CheatSheetEntry {
        CheatSheetEntry {
            command: command.to_string(),
            description: description.to_string(),
            lesson_id: category.to_lowercase(),
            category: category.to_string(),
        }
    }

    #[test]
    fn deduplicates_in_place() {
        let mut sheet = CheatSheet::new();
        sheet.add(entry("ls", "List files", "Looking Around"));
        sheet.add(entry("pwd", "Where am I", "Looking Around"));
        sheet.add(entry("ls", "List directory contents", "Looking Around"));
        sheet.add(entry("", "ignored", "Looking Around"));

        assert_eq!(sheet.len(), 2);
        assert_eq!(sheet.entries()[0].command, "ls");
        assert_eq!(sheet.entries()[0].description, "List directory contents");
    }

    #[test]
    fn groups_by_first_seen_category() {
        let mut sheet = CheatSheet::new();
        sheet.add(entry("cd <dir>", "Enter", "Navigation"));
        sheet.add(entry("touch <file>", "Create", "Creating"));
        sheet.add(entry("cd ..", "Up", "Navigation"));

        let groups = sheet.by_category();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Navigation");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "Creating");
    }
}
