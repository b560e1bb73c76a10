use std::sync::Arc;
use std::time::Duration;

use marquee_shared::{
    ArchivedMovie, Movie, MovieDetails, MovieFilter, MovieListing, MovieSummary, NewMovie,
    Schedule, ScheduleFilter,
};
use tracing::info;

use crate::cache::{CacheAside, CacheKey};
use crate::repository::CatalogStore;
use crate::{CoreError, CoreResult, WriteOutcome};

/// Catalog reads served through the cache, and catalog writes that clear it.
#[derive(Clone)]
pub struct CatalogRepository {
    store: Arc<dyn CatalogStore>,
    cache: CacheAside,
    ttl: Duration,
}

impl CatalogRepository {
    pub fn new(store: Arc<dyn CatalogStore>, cache: CacheAside, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Titles not yet released.
    pub async fn list_upcoming(&self) -> CoreResult<Vec<Movie>> {
        let store = &self.store;
        self.cache
            .resolve(&self.cache.key(CacheKey::Upcoming), self.ttl, move || async move {
                store.upcoming_movies().await
            })
            .await
            .map_err(CoreError::Store)
    }

    /// Titles ranked by paid bookings on current schedules.
    pub async fn list_popular(&self) -> CoreResult<Vec<Movie>> {
        let store = &self.store;
        self.cache
            .resolve(&self.cache.key(CacheKey::Popular), self.ttl, move || async move {
                store.popular_movies().await
            })
            .await
            .map_err(CoreError::Store)
    }

    /// Only the unfiltered first page goes through the cache.
    pub async fn list_filtered(&self, filter: &MovieFilter) -> CoreResult<Vec<Movie>> {
        if filter.limit <= 0 || filter.offset < 0 {
            return Err(CoreError::Validation(format!(
                "invalid page: offset {} limit {}",
                filter.offset, filter.limit
            )));
        }

        let store = &self.store;
        if filter.is_first_page() {
            return self
                .cache
                .resolve(&self.cache.key(CacheKey::FirstPage), self.ttl, move || async move {
                    store.filter_movies(filter).await
                })
                .await
                .map_err(CoreError::Store);
        }

        store.filter_movies(filter).await.map_err(CoreError::Store)
    }

    pub async fn movie_details(&self, movie_id: i32) -> CoreResult<MovieDetails> {
        self.store
            .movie_details(movie_id)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| CoreError::NotFound(format!("movie {movie_id}")))
    }

    pub async fn list_all_movies(&self, offset: i64) -> CoreResult<Vec<MovieListing>> {
        if offset < 0 {
            return Err(CoreError::Validation(format!("invalid offset {offset}")));
        }
        self.store
            .list_all_movies(offset)
            .await
            .map_err(CoreError::Store)
    }

    pub async fn archive_movie(&self, movie_id: i32) -> CoreResult<WriteOutcome<ArchivedMovie>> {
        let archived = self
            .store
            .archive_movie(movie_id)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| CoreError::NotFound(format!("movie {movie_id}")))?;

        info!(movie_id, "movie archived");
        self.after_write(archived).await
    }

    pub async fn create_movie(&self, movie: &NewMovie) -> CoreResult<WriteOutcome<MovieSummary>> {
        validate_movie(movie)?;
        let created = self
            .store
            .create_movie(movie)
            .await
            .map_err(CoreError::Store)?;

        info!(
            movie_id = created.id,
            schedules = movie.schedule.slots().len(),
            "movie created"
        );
        self.after_write(created).await
    }

    pub async fn edit_movie(
        &self,
        movie_id: i32,
        movie: &NewMovie,
    ) -> CoreResult<WriteOutcome<MovieSummary>> {
        validate_movie(movie)?;
        let edited = self
            .store
            .edit_movie(movie_id, movie)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| CoreError::NotFound(format!("movie {movie_id}")))?;

        info!(movie_id, "movie edited");
        self.after_write(edited).await
    }

    pub async fn filter_schedules(&self, filter: &ScheduleFilter) -> CoreResult<Vec<Schedule>> {
        self.store
            .filter_schedules(filter)
            .await
            .map_err(CoreError::Store)
    }

    /// Runs only once the store call has returned, i.e. after its commit.
    async fn after_write<T>(&self, value: T) -> CoreResult<WriteOutcome<T>> {
        let invalidation = self.cache.invalidate(&CacheKey::CATALOG).await;
        Ok(WriteOutcome {
            value,
            invalidation,
        })
    }
}

fn validate_movie(movie: &NewMovie) -> CoreResult<()> {
    if movie.title.trim().is_empty() {
        return Err(CoreError::Validation("title must not be empty".to_string()));
    }
    if movie.duration_minutes.is_some_and(|d| d <= 0) {
        return Err(CoreError::Validation(
            "duration must be positive".to_string(),
        ));
    }
    if movie.genres.iter().chain(&movie.cast).any(|n| n.trim().is_empty()) {
        return Err(CoreError::Validation(
            "genre and cast names must not be blank".to_string(),
        ));
    }
    if movie.schedule.last_show_date().is_none() {
        return Err(CoreError::Validation(format!(
            "schedule window starting {} is out of range",
            movie.schedule.first_show_date
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryCatalogStore};
    use chrono::NaiveDate;
    use marquee_shared::SchedulePlan;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn repository() -> (MemoryCatalogStore, CatalogRepository) {
        let store = MemoryCatalogStore::new(today());
        let cache = CacheAside::new(Arc::new(MemoryCache::new()), "test");
        let repo = CatalogRepository::new(Arc::new(store.clone()), cache, Duration::from_secs(3600));
        (store, repo)
    }

    fn movie(title: &str) -> NewMovie {
        NewMovie {
            title: title.to_string(),
            synopsis: None,
            age_rating_id: Some(1),
            release_date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            duration_minutes: Some(120),
            director: Some("Denis Villeneuve".to_string()),
            genres: vec!["Sci-Fi".to_string()],
            cast: vec![],
            poster_img: None,
            backdrop_img: None,
            schedule: SchedulePlan {
                first_show_date: today(),
                city_ids: vec![1],
                cinema_ids: vec![1],
                show_time_ids: vec![1],
            },
        }
    }

    #[tokio::test]
    async fn test_non_first_page_bypasses_cache() {
        let (store, repo) = repository();
        let filter = MovieFilter::default().with_keywords(["dune"]);

        repo.list_filtered(&filter).await.unwrap();
        repo.list_filtered(&filter).await.unwrap();

        assert_eq!(store.fetches.filtered(), 2);
    }

    #[tokio::test]
    async fn test_first_page_is_cached() {
        let (store, repo) = repository();

        repo.list_filtered(&MovieFilter::default()).await.unwrap();
        repo.list_filtered(&MovieFilter::default()).await.unwrap();

        assert_eq!(store.fetches.filtered(), 1);
    }

    #[tokio::test]
    async fn test_missing_movie_is_not_found() {
        let (_, repo) = repository();
        assert!(matches!(
            repo.movie_details(42).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.archive_movie(42).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.edit_movie(42, &movie("Dune")).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let (_, repo) = repository();
        assert!(matches!(
            repo.create_movie(&movie("  ")).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_schedule_window_is_rejected() {
        let (_, repo) = repository();
        let mut late = movie("Dune");
        late.schedule.first_show_date = NaiveDate::MAX;

        assert!(matches!(
            repo.create_movie(&late).await,
            Err(CoreError::Validation(_))
        ));
        assert!(repo.list_all_movies(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_replaces_schedules() {
        let (store, repo) = repository();
        let created = repo.create_movie(&movie("Dune")).await.unwrap().value;
        assert_eq!(store.schedules_for(created.id).len(), 7);

        let mut edited = movie("Dune: Part Two");
        edited.schedule.cinema_ids = vec![1, 2];
        repo.edit_movie(created.id, &edited).await.unwrap();

        assert_eq!(store.schedules_for(created.id).len(), 14);
        let details = repo.movie_details(created.id).await.unwrap();
        assert_eq!(details.title, "Dune: Part Two");
    }
}
