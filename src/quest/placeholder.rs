//! `{{field}}` substitution in quest titles.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A title split into literal text and named fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleTemplate {
    segments: Vec<Segment>,
}

impl TitleTemplate {
    /// Parse a title. An unterminated `{{` or an empty field name stays literal.
    pub fn parse(src: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = src;

        while let Some(open) = rest.find("{{") {
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                break;
            };
            let name = after[..close].trim();
            if name.is_empty() {
                literal.push_str(&rest[..open + 2 + close + 2]);
            } else {
                literal.push_str(&rest[..open]);
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(name.to_string()));
            }
            rest = &after[close + 2..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    /// Field names in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render with personalized values, falling back to template defaults.
    /// Fields with neither are stripped and whitespace is collapsed.
    pub fn render(
        &self,
        values: &BTreeMap<String, String>,
        defaults: &BTreeMap<String, String>,
    ) -> String {
        let mut out = String::new();
        let mut stripped = false;

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => match values.get(name).or_else(|| defaults.get(name)) {
                    Some(value) => out.push_str(value),
                    None => stripped = true,
                },
            }
        }

        if stripped {
            out.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_personalized_value_wins() {
        let t = TitleTemplate::parse("Call {{friend}} today");
        assert_eq!(t.fields().collect::<Vec<_>>(), vec!["friend"]);
        let out = t.render(&map(&[("friend", "Sam")]), &map(&[("friend", "a friend")]));
        assert_eq!(out, "Call Sam today");
    }

    #[test]
    fn test_default_then_strip() {
        let t = TitleTemplate::parse("Read {{ pages }} pages of {{book}}");
        let out = t.render(&BTreeMap::new(), &map(&[("pages", "10")]));
        assert_eq!(out, "Read 10 pages of");
    }

    #[test]
    fn test_unterminated_is_literal() {
        let t = TitleTemplate::parse("Drink {{water");
        assert_eq!(t.fields().count(), 0);
        assert_eq!(t.render(&BTreeMap::new(), &BTreeMap::new()), "Drink {{water");

        let t = TitleTemplate::parse("Empty {{}} braces");
        assert_eq!(t.render(&BTreeMap::new(), &BTreeMap::new()), "Empty {{}} braces");
    }
}
