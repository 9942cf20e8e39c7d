//! Cinema admin resources and the references each list screen resolves.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// A foreign-key attribute on a row and the reference set it points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub field: &'static str,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Categories,
    Combos,
    Items,
    Cinemas,
    Halls,
    Movies,
    Payments,
    Showtimes,
    Tickets,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Categories,
        ResourceKind::Combos,
        ResourceKind::Items,
        ResourceKind::Cinemas,
        ResourceKind::Halls,
        ResourceKind::Movies,
        ResourceKind::Payments,
        ResourceKind::Showtimes,
        ResourceKind::Tickets,
    ];

    /// REST collection segment, also used as the reference-set kind name.
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Categories => "categories",
            ResourceKind::Combos => "combos",
            ResourceKind::Items => "items",
            ResourceKind::Cinemas => "cinemas",
            ResourceKind::Halls => "halls",
            ResourceKind::Movies => "movies",
            ResourceKind::Payments => "payments",
            ResourceKind::Showtimes => "showtimes",
            ResourceKind::Tickets => "tickets",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_matches('/');
        Self::ALL.into_iter().find(|k| k.path().eq_ignore_ascii_case(s))
    }

    /// Attribute shown when another screen references a record of this kind.
    pub fn label_field(self) -> &'static str {
        match self {
            ResourceKind::Movies => "title",
            ResourceKind::Showtimes => "start_time",
            ResourceKind::Tickets => "seat",
            ResourceKind::Payments => "reference",
            _ => "name",
        }
    }

    pub fn default_sort(self) -> Option<&'static str> {
        match self {
            ResourceKind::Movies => Some("title"),
            ResourceKind::Showtimes => Some("start_time"),
            ResourceKind::Payments | ResourceKind::Tickets => Some("created_at"),
            ResourceKind::Categories | ResourceKind::Combos | ResourceKind::Items | ResourceKind::Cinemas | ResourceKind::Halls => Some("name"),
        }
    }

    /// Direct references a row of this kind carries.
    pub fn foreign_keys(self) -> &'static [ForeignKey] {
        const ITEMS: &[ForeignKey] = &[ForeignKey { field: "category_id", kind: ResourceKind::Categories }];
        const HALLS: &[ForeignKey] = &[ForeignKey { field: "cinema_id", kind: ResourceKind::Cinemas }];
        const SHOWTIMES: &[ForeignKey] = &[
            ForeignKey { field: "movie_id", kind: ResourceKind::Movies },
            ForeignKey { field: "hall_id", kind: ResourceKind::Halls },
        ];
        const TICKETS: &[ForeignKey] = &[ForeignKey { field: "showtime_id", kind: ResourceKind::Showtimes }];
        const PAYMENTS: &[ForeignKey] = &[ForeignKey { field: "ticket_id", kind: ResourceKind::Tickets }];
        match self {
            ResourceKind::Items => ITEMS,
            ResourceKind::Halls => HALLS,
            ResourceKind::Showtimes => SHOWTIMES,
            ResourceKind::Tickets => TICKETS,
            ResourceKind::Payments => PAYMENTS,
            ResourceKind::Categories | ResourceKind::Combos | ResourceKind::Cinemas | ResourceKind::Movies => &[],
        }
    }

    /// Multi-hop references rendered as extra columns, e.g. the cinema a
    /// showtime's hall belongs to. Each entry is `(column, path)`.
    pub fn derived_references(self) -> &'static [(&'static str, &'static [ForeignKey])] {
        const SHOWTIME_CINEMA: &[ForeignKey] = &[
            ForeignKey { field: "hall_id", kind: ResourceKind::Halls },
            ForeignKey { field: "cinema_id", kind: ResourceKind::Cinemas },
        ];
        match self {
            ResourceKind::Showtimes => &[("cinema", SHOWTIME_CINEMA)],
            _ => &[],
        }
    }

    /// Every reference set a screen for this kind needs loaded.
    pub fn reference_kinds(self) -> Vec<ResourceKind> {
        let mut out: Vec<ResourceKind> = self.foreign_keys().iter().map(|fk| fk.kind).collect();
        for (_, path) in self.derived_references() {
            out.extend(path.iter().map(|fk| fk.kind));
        }
        out.sort();
        out.dedup();
        out
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_paths() {
        assert_eq!(ResourceKind::parse("showtimes"), Some(ResourceKind::Showtimes));
        assert_eq!(ResourceKind::parse("/Halls/"), Some(ResourceKind::Halls));
        assert_eq!(ResourceKind::parse("popcorn"), None);
        for k in ResourceKind::ALL {
            assert_eq!(ResourceKind::parse(k.path()), Some(k));
        }
    }

    #[test]
    fn showtimes_need_movies_halls_and_cinemas() {
        assert_eq!(
            ResourceKind::Showtimes.reference_kinds(),
            vec![ResourceKind::Cinemas, ResourceKind::Halls, ResourceKind::Movies]
        );
        assert!(ResourceKind::Movies.reference_kinds().is_empty());
    }
}
