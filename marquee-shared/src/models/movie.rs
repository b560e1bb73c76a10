use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::SchedulePlan;

/// Page size of the unfiltered catalog listing.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// A title as shown in catalog listings (upcoming, popular, filtered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i32,
    pub title: String,
    #[serde(default)]
    pub synopsis: Option<String>,
    pub poster_img: Option<String>,
    #[serde(default)]
    pub backdrop_img: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    pub release_date: NaiveDate,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: i32,
    pub title: String,
    pub synopsis: Option<String>,
    pub poster_img: Option<String>,
    pub backdrop_img: Option<String>,
    pub duration_minutes: Option<i32>,
    pub release_date: NaiveDate,
    pub age_rating_id: Option<i32>,
    pub genres: Vec<String>,
    pub director: Option<String>,
    pub cast: Vec<String>,
}

/// Admin listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieListing {
    pub id: i32,
    pub title: String,
    pub poster_img: Option<String>,
    pub release_date: NaiveDate,
    pub genres: Vec<String>,
    pub duration_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMovie {
    pub id: i32,
    pub title: String,
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: i32,
    pub title: String,
    pub release_date: NaiveDate,
    pub duration_minutes: Option<i32>,
}

/// Payload for creating or editing a title together with its screenings.
///
/// Image fields hold already-stored paths. On edit, `None` keeps the current
/// image; empty `genres`/`cast`/`director` keep the current associations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMovie {
    pub title: String,
    pub synopsis: Option<String>,
    pub age_rating_id: Option<i32>,
    pub release_date: NaiveDate,
    pub duration_minutes: Option<i32>,
    pub director: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    pub poster_img: Option<String>,
    pub backdrop_img: Option<String>,
    pub schedule: SchedulePlan,
}

/// Catalog search predicates. Each field maps to exactly one SQL clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieFilter {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub genre_ids: Vec<i32>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for MovieFilter {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            genre_ids: Vec::new(),
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MovieFilter {
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords
            .into_iter()
            .map(Into::into)
            .filter(|k: &String| !k.trim().is_empty())
            .collect();
        self
    }

    pub fn with_genres(mut self, genre_ids: impl IntoIterator<Item = i32>) -> Self {
        self.genre_ids = genre_ids.into_iter().collect();
        self
    }

    pub fn page(mut self, offset: i64, limit: i64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// True for the unfiltered first page, the only filtered view that is cached.
    pub fn is_first_page(&self) -> bool {
        self.offset == 0
            && self.limit == DEFAULT_PAGE_SIZE
            && self.keywords.is_empty()
            && self.genre_ids.is_empty()
    }
}
