use lazy_static::lazy_static;

lazy_static! {
    static ref DEFAULT_GROUPS: Vec<Vec<String>> = [
        &["cat", "kitty", "kitten", "猫", "猫咪"][..],
        &["dog", "puppy", "doggy", "狗", "小狗"],
        &["beach", "seaside", "coast", "海滩", "海边"],
        &["sea", "ocean", "海", "大海"],
        &["mountain", "hill", "peak", "山"],
        &["sunset", "dusk", "日落", "夕阳"],
        &["flower", "blossom", "花"],
        &["food", "meal", "dish", "美食"],
        &["car", "vehicle", "automobile", "汽车"],
        &["snow", "snowy", "雪"],
        &["child", "kid", "baby", "孩子"],
        &["person", "people", "portrait", "人物"],
    ]
    .iter()
    .map(|group| group.iter().map(|w| w.to_string()).collect())
    .collect();
}

/// Equivalence groups used to widen keyword terms.
#[derive(Debug, Clone)]
pub struct SynonymTable {
    groups: Vec<Vec<String>>,
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self {
            groups: DEFAULT_GROUPS.clone(),
        }
    }
}

impl SynonymTable {
    /// Table from configured groups; an empty list selects the built-in groups.
    pub fn from_groups(groups: &[Vec<String>]) -> Self {
        let groups: Vec<Vec<String>> = groups
            .iter()
            .map(|g| {
                g.iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|g| !g.is_empty())
            .collect();
        if groups.is_empty() {
            Self::default()
        } else {
            Self { groups }
        }
    }

    /// The term followed by every word of each group related to it. A group is related
    /// when one of its words contains the term or the term contains one of its words.
    pub fn expand(&self, term: &str) -> Vec<String> {
        let term = term.trim();
        let mut words = vec![term.to_string()];
        if term.is_empty() {
            return words;
        }
        let needle = term.to_lowercase();

        for group in &self.groups {
            let related = group
                .iter()
                .any(|w| w.contains(needle.as_str()) || needle.contains(w.as_str()));
            if related {
                for w in group {
                    if !words.iter().any(|existing| existing.to_lowercase() == *w) {
                        words.push(w.clone());
                    }
                }
            }
        }
        words
    }
}
