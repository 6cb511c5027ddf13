//! Machine image selection by tag filter.
//!
//! Most-recent selection only considers images carrying a non-empty
//! `Created` tag; candidates are ordered by that tag descending with a stable
//! sort, so equal timestamps keep catalog order.

use super::error::ImageError;
use super::types::MachineImage;
use indexmap::IndexMap;

/// Tag holding the image creation timestamp (ISO 8601).
pub const CREATED_TAG: &str = "Created";

/// How many matches a selection accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Newest timestamped match wins.
    MostRecent,
    /// Exactly one match is required.
    Unique,
}

/// Select the most recently created image matching every filter tag.
pub fn select_image<'a>(
    filter: &IndexMap<String, String>,
    images: &'a [MachineImage],
) -> Result<&'a MachineImage, ImageError> {
    select_with(filter, images, SelectionPolicy::MostRecent)
}

pub fn select_with<'a>(
    filter: &IndexMap<String, String>,
    images: &'a [MachineImage],
    policy: SelectionPolicy,
) -> Result<&'a MachineImage, ImageError> {
    let mut candidates: Vec<&MachineImage> = images
        .iter()
        .filter(|image| matches(filter, image))
        .filter(|image| policy == SelectionPolicy::Unique || created(image).is_some())
        .collect();

    match (policy, candidates.len()) {
        (_, 0) => Err(ImageError::NotFound {
            filter: describe(filter),
        }),
        (SelectionPolicy::Unique, 1) => Ok(candidates[0]),
        (SelectionPolicy::Unique, count) => Err(ImageError::Ambiguous {
            filter: describe(filter),
            count,
        }),
        (SelectionPolicy::MostRecent, _) => {
            candidates.sort_by(|a, b| created(b).cmp(&created(a)));
            Ok(candidates[0])
        }
    }
}

fn matches(filter: &IndexMap<String, String>, image: &MachineImage) -> bool {
    filter
        .iter()
        .all(|(k, v)| image.tags.get(k).is_some_and(|tag| tag == v))
}

fn created(image: &MachineImage) -> Option<&str> {
    image
        .tags
        .get(CREATED_TAG)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Render a filter as `{k=v, ...}` for error messages.
pub fn describe(filter: &IndexMap<String, String>) -> String {
    let parts: Vec<String> = filter.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, tags: &[(&str, &str)]) -> MachineImage {
        MachineImage {
            id: id.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn leader_filter() -> IndexMap<String, String> {
        IndexMap::from([
            ("Name".to_string(), "mesos-leader".to_string()),
            ("StackType".to_string(), "accumulo".to_string()),
        ])
    }

    #[test]
    fn test_image_most_recent_wins() {
        let images = vec![
            image("ami-old", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "2020-01-01")]),
            image("ami-new", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "2021-06-01")]),
        ];
        let picked = select_image(&leader_filter(), &images).unwrap();
        assert_eq!(picked.id, "ami-new");
    }

    #[test]
    fn test_image_untimestamped_never_eligible() {
        let images = vec![
            image("ami-bare", &[("Name", "mesos-leader"), ("StackType", "accumulo")]),
            image("ami-empty", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "")]),
        ];
        let err = select_image(&leader_filter(), &images).unwrap_err();
        assert!(matches!(err, ImageError::NotFound { .. }));
    }

    #[test]
    fn test_image_all_tags_must_match() {
        let images = vec![
            image("ami-follower", &[("Name", "mesos-follower"), ("StackType", "accumulo"), ("Created", "2022-01-01")]),
            image("ami-other", &[("Name", "mesos-leader"), ("StackType", "cassandra"), ("Created", "2022-01-01")]),
        ];
        let err = select_image(&leader_filter(), &images).unwrap_err();
        assert_eq!(
            err,
            ImageError::NotFound {
                filter: "{Name=mesos-leader, StackType=accumulo}".to_string()
            }
        );
    }

    #[test]
    fn test_image_tie_keeps_catalog_order() {
        let images = vec![
            image("ami-first", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "2021-06-01")]),
            image("ami-second", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "2021-06-01")]),
        ];
        assert_eq!(select_image(&leader_filter(), &images).unwrap().id, "ami-first");
    }

    #[test]
    fn test_image_iso_timestamps_with_time() {
        let images = vec![
            image("ami-morning", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "2021-06-01T08:00:00Z")]),
            image("ami-evening", &[("Name", "mesos-leader"), ("StackType", "accumulo"), ("Created", "2021-06-01T20:00:00Z")]),
        ];
        assert_eq!(select_image(&leader_filter(), &images).unwrap().id, "ami-evening");
    }

    #[test]
    fn test_image_unique_policy() {
        let filter = IndexMap::from([("Arch".to_string(), "amd64".to_string())]);
        let one = vec![image("ami-a", &[("Arch", "amd64")])];
        assert_eq!(
            select_with(&filter, &one, SelectionPolicy::Unique).unwrap().id,
            "ami-a"
        );

        let two = vec![image("ami-a", &[("Arch", "amd64")]), image("ami-b", &[("Arch", "amd64")])];
        let err = select_with(&filter, &two, SelectionPolicy::Unique).unwrap_err();
        assert!(matches!(err, ImageError::Ambiguous { count: 2, .. }));
    }

    #[test]
    fn test_image_empty_filter_matches_any() {
        let images = vec![image("ami-x", &[("Created", "2020-01-01")])];
        assert_eq!(select_image(&IndexMap::new(), &images).unwrap().id, "ami-x");
    }
}
