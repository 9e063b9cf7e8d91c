use std::fmt;

use serde::Serialize;

/// A container image reference split into repository name, tag and digest.
///
/// Rendering with `Display` gives back the string it was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn parse(image: &str) -> Self {
        let (rest, digest) = match image.split_once('@') {
            Some((r, d)) => (r, Some(d.to_string())),
            None => (image, None),
        };
        // A ':' before the last '/' belongs to a registry port, not a tag
        let last_segment = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_segment..].rfind(':') {
            Some(i) => {
                let at = last_segment + i;
                (&rest[..at], Some(rest[at + 1..].to_string()))
            }
            None => (rest, None),
        };
        Self { name: name.to_string(), tag, digest }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub name: String,
    pub image: ImageRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_shapes() {
        let plain = ImageRef::parse("nginx");
        assert_eq!(plain.name, "nginx");
        assert_eq!(plain.tag, None);

        let tagged = ImageRef::parse("quay.io/org/app:v1.2.3");
        assert_eq!(tagged.name, "quay.io/org/app");
        assert_eq!(tagged.tag.as_deref(), Some("v1.2.3"));

        let port = ImageRef::parse("registry:5000/app");
        assert_eq!(port.name, "registry:5000/app");
        assert_eq!(port.tag, None);

        let digest = ImageRef::parse("ghcr.io/x/y:1@sha256:abcd");
        assert_eq!(digest.name, "ghcr.io/x/y");
        assert_eq!(digest.tag.as_deref(), Some("1"));
        assert_eq!(digest.digest.as_deref(), Some("sha256:abcd"));
    }

    #[test]
    fn display_reproduces_input() {
        for s in ["nginx", "nginx:1.25", "registry:5000/app:v1", "a/b@sha256:00", ""] {
            assert_eq!(ImageRef::parse(s).to_string(), s);
        }
    }
}
