//! Skill detection: which configured skills the user's message triggers.

use chatforge_core::skill::Skill;

pub const SKILL_THRESHOLD: f64 = 0.6;
pub const MAX_SKILLS: usize = 3;

const KEYWORD_WEIGHT: f64 = 0.7;
const DESCRIPTION_WEIGHT: f64 = 0.3;
const DESCRIPTION_FULL_HITS: f64 = 5.0;

/// A skill that fired, with the evidence.
#[derive(Debug, Clone)]
pub struct SkillMatch<'a> {
    pub skill: &'a Skill,
    pub confidence: f64,
    pub matched_keywords: Vec<&'a str>,
}

fn score<'a>(skill: &'a Skill, input: &str) -> SkillMatch<'a> {
    let matched_keywords: Vec<&str> = skill
        .trigger_keywords
        .iter()
        .filter(|k| input.contains(&k.to_lowercase()))
        .map(String::as_str)
        .collect();

    let keyword_score = if skill.trigger_keywords.is_empty() {
        0.0
    } else {
        matched_keywords.len() as f64 / skill.trigger_keywords.len() as f64
    };

    let description = skill.description.to_lowercase();
    let description_hits = description
        .split_whitespace()
        .filter(|w| w.chars().count() > 3 && input.contains(*w))
        .count();
    let description_score = (description_hits as f64 / DESCRIPTION_FULL_HITS).min(1.0);

    SkillMatch {
        skill,
        confidence: keyword_score * KEYWORD_WEIGHT + description_score * DESCRIPTION_WEIGHT,
        matched_keywords,
    }
}

/// Enabled skills whose confidence reaches the threshold with at least one
/// keyword hit, best first, at most [`MAX_SKILLS`].
pub fn detect<'a>(input: &str, skills: &'a [Skill]) -> Vec<SkillMatch<'a>> {
    let input = input.to_lowercase();
    let mut matches: Vec<SkillMatch<'a>> = skills
        .iter()
        .filter(|s| s.is_enabled)
        .map(|s| score(s, &input))
        .filter(|m| m.confidence >= SKILL_THRESHOLD && !m.matched_keywords.is_empty())
        .collect();

    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(MAX_SKILLS);
    matches
}

/// The `# Active Skills` block appended to the system prompt. Empty when
/// nothing fired.
pub fn skills_prompt(matches: &[SkillMatch<'_>]) -> String {
    if matches.is_empty() {
        return String::new();
    }

    let sections: Vec<String> = matches
        .iter()
        .map(|m| {
            let resources: String = m
                .skill
                .resources
                .iter()
                .map(|r| format!("\n### {}\n{}\n", r.name, r.content))
                .collect();
            format!(
                "## {}\n\n{}\n{resources}",
                m.skill.display_name, m.skill.instructions
            )
        })
        .collect();

    format!("\n\n# Active Skills\n\n{}", sections.join("\n---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatforge_core::skill::SkillResource;

    fn skill(name: &str, keywords: &[&str], description: &str) -> Skill {
        Skill {
            name: name.into(),
            display_name: name.to_uppercase(),
            description: description.into(),
            instructions: format!("Follow the {name} playbook."),
            trigger_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            resources: Vec::new(),
            is_enabled: true,
        }
    }

    #[test]
    fn single_keyword_skill_fires() {
        let skills = vec![skill("sql", &["SQL"], "Writes queries")];
        let found = detect("help me with this sql join", &skills);
        assert_eq!(found.len(), 1);
        assert!((found[0].confidence - 0.7).abs() < 1e-9);
        assert_eq!(found[0].matched_keywords, vec!["SQL"]);
    }

    #[test]
    fn weak_or_keywordless_matches_are_rejected() {
        let skills = vec![
            skill("one-of-four", &["alpha", "beta", "gamma", "delta"], ""),
            skill("description-only", &[], "translate documents between languages quickly"),
        ];
        let found = detect("alpha: translate documents between languages quickly", &skills);
        assert!(found.is_empty());
    }

    #[test]
    fn description_words_raise_confidence() {
        let skills = vec![skill(
            "review",
            &["review", "audit"],
            "careful rust code safety focus",
        )];
        // 1/2 keywords = 0.35, 4 long description words = 0.24 → 0.59
        assert!(detect("review careful rust code safety", &skills).is_empty());
        // plus "focus" makes 5 → 0.65
        let found = detect("review careful rust code safety focus", &skills);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn disabled_skills_and_cap() {
        let mut skills: Vec<Skill> = (0..5).map(|i| skill(&format!("s{i}"), &["deploy"], "")).collect();
        skills[0].is_enabled = false;
        let found = detect("deploy it", &skills);
        assert_eq!(found.len(), MAX_SKILLS);
        assert!(found.iter().all(|m| m.skill.name != "s0"));
    }

    #[test]
    fn prompt_lists_sections_and_resources() {
        let mut s = skill("sql", &["sql"], "");
        s.resources = vec![SkillResource {
            name: "Style".into(),
            content: "Uppercase keywords".into(),
        }];
        let other = skill("git", &["git"], "");
        let matches = detect("sql and git", std::slice::from_ref(&s))
            .into_iter()
            .chain(detect("git", std::slice::from_ref(&other)))
            .collect::<Vec<_>>();

        let prompt = skills_prompt(&matches);
        assert!(prompt.starts_with("\n\n# Active Skills\n\n## SQL\n\nFollow the sql playbook.\n"));
        assert!(prompt.contains("\n### Style\nUppercase keywords\n"));
        assert!(prompt.contains("\n---\n## GIT"));
        assert_eq!(skills_prompt(&[]), "");
    }
}
