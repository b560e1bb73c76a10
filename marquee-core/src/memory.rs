//! In-process gateway implementations.
//!
//! These back the core with plain collections so repository behaviour can be
//! exercised without Postgres or redis:
//! - [`MemoryCache`]: TTL-aware key-value cache with outage and per-key
//!   delete failure switches
//! - [`MemoryBookingStore`]: booking tables with staged atomic units and
//!   failure injection at each reservation step
//! - [`MemoryCatalogStore`]: catalog tables with per-view fetch counters

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use marquee_shared::{
    ArchivedMovie, Movie, MovieDetails, MovieFilter, MovieListing, MovieSummary, NewBooking,
    NewMovie, Schedule, ScheduleFilter, TransactionHistory,
};
use uuid::Uuid;

use crate::cache::CacheGateway;
use crate::repository::{BookingStore, BookingUnit, CatalogStore};
use crate::BoxError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    offline: AtomicBool,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail, as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_deletes_for(&self, key: &str) {
        lock(&self.failing_deletes).insert(key.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.raw(key).is_some()
    }

    /// Live entry bytes, ignoring the offline switch.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        let entries = lock(&self.entries);
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    fn ensure_online(&self) -> Result<(), BoxError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err("cache unreachable".into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheGateway for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError> {
        self.ensure_online()?;
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BoxError> {
        self.ensure_online()?;
        lock(&self.entries).insert(
            key.to_string(),
            CacheEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BoxError> {
        self.ensure_online()?;
        if lock(&self.failing_deletes).contains(key) {
            return Err(format!("delete rejected for {key}").into());
        }
        lock(&self.entries).remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BoxError> {
        self.ensure_online()?;
        Ok(self.raw(key).is_some())
    }
}

// ---------------------------------------------------------------------------
// Bookings
// ---------------------------------------------------------------------------

/// Statement of a seat reservation at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStep {
    SeatCodes,
    Transaction,
    Links,
    Commit,
}

#[derive(Debug, Clone)]
struct TransactionRow {
    user_id: Uuid,
    schedule_id: i32,
    total_payment: i32,
    phone_number: String,
    paid_at: Option<DateTime<Utc>>,
    scanned_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    /// Tie-breaker for rows updated within the same clock tick.
    revision: u64,
}

#[derive(Default)]
struct BookingTables {
    schedules: HashMap<i32, Schedule>,
    seat_codes: HashMap<i32, String>,
    transactions: HashMap<Uuid, TransactionRow>,
    links: Vec<(Uuid, i32)>,
}

#[derive(Default)]
struct BookingShared {
    tables: Mutex<BookingTables>,
    next_seat_id: AtomicI32,
    revision: AtomicU64,
    fail_at: Mutex<Option<BookingStep>>,
}

impl BookingShared {
    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst)
    }

    fn check(&self, step: BookingStep) -> Result<(), BoxError> {
        if *lock(&self.fail_at) == Some(step) {
            return Err(format!("injected failure at {step:?}").into());
        }
        Ok(())
    }
}

/// Booking tables held in memory. Schedules must be registered before they
/// can be booked, mirroring the foreign key on `transactions.schedule_id`.
#[derive(Clone, Default)]
pub struct MemoryBookingStore {
    shared: Arc<BookingShared>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schedule(&self, schedule: Schedule) {
        lock(&self.shared.tables)
            .schedules
            .insert(schedule.id, schedule);
    }

    pub fn fail_at(&self, step: Option<BookingStep>) {
        *lock(&self.shared.fail_at) = step;
    }

    pub fn seat_code_count(&self) -> usize {
        lock(&self.shared.tables).seat_codes.len()
    }

    pub fn transaction_count(&self) -> usize {
        lock(&self.shared.tables).transactions.len()
    }

    pub fn link_count(&self) -> usize {
        lock(&self.shared.tables).links.len()
    }
}

struct MemoryBookingUnit {
    shared: Arc<BookingShared>,
    seat_codes: Vec<(i32, String)>,
    transactions: Vec<(Uuid, TransactionRow)>,
    links: Vec<(Uuid, i32)>,
}

#[async_trait]
impl BookingUnit for MemoryBookingUnit {
    async fn insert_seat_codes(&mut self, labels: &[String]) -> Result<Vec<i32>, BoxError> {
        self.shared.check(BookingStep::SeatCodes)?;
        let mut ids = Vec::with_capacity(labels.len());
        for label in labels {
            let id = self.shared.next_seat_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.seat_codes.push((id, label.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_transaction(
        &mut self,
        user_id: Uuid,
        booking: &NewBooking,
    ) -> Result<Uuid, BoxError> {
        self.shared.check(BookingStep::Transaction)?;
        if !lock(&self.shared.tables)
            .schedules
            .contains_key(&booking.schedule_id)
        {
            return Err(format!(
                "foreign key violation: schedule {} does not exist",
                booking.schedule_id
            )
            .into());
        }

        let id = Uuid::new_v4();
        self.transactions.push((
            id,
            TransactionRow {
                user_id,
                schedule_id: booking.schedule_id,
                total_payment: booking.total_payment,
                phone_number: booking.phone_number.clone(),
                paid_at: None,
                scanned_at: None,
                updated_at: Utc::now(),
                revision: self.shared.next_revision(),
            },
        ));
        Ok(id)
    }

    async fn link_seats(&mut self, transaction_id: Uuid, seat_ids: &[i32]) -> Result<(), BoxError> {
        self.shared.check(BookingStep::Links)?;
        self.links
            .extend(seat_ids.iter().map(|&seat_id| (transaction_id, seat_id)));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        let unit = *self;
        unit.shared.check(BookingStep::Commit)?;
        let mut tables = lock(&unit.shared.tables);
        tables.seat_codes.extend(unit.seat_codes);
        tables.transactions.extend(unit.transactions);
        tables.links.extend(unit.links);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn begin(&self) -> Result<Box<dyn BookingUnit>, BoxError> {
        Ok(Box::new(MemoryBookingUnit {
            shared: Arc::clone(&self.shared),
            seat_codes: Vec::new(),
            transactions: Vec::new(),
            links: Vec::new(),
        }))
    }

    async fn mark_paid(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        let revision = self.shared.next_revision();
        let mut tables = lock(&self.shared.tables);
        match tables.transactions.get_mut(&transaction_id) {
            Some(row) if row.paid_at.is_none() => {
                let now = Utc::now();
                row.paid_at = Some(now);
                row.updated_at = now;
                row.revision = revision;
                Ok(Some(transaction_id))
            }
            _ => Ok(None),
        }
    }

    async fn mark_scanned(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        let revision = self.shared.next_revision();
        let mut tables = lock(&self.shared.tables);
        match tables.transactions.get_mut(&transaction_id) {
            Some(row) if row.paid_at.is_some() && row.scanned_at.is_none() => {
                let now = Utc::now();
                row.scanned_at = Some(now);
                row.updated_at = now;
                row.revision = revision;
                Ok(Some(transaction_id))
            }
            _ => Ok(None),
        }
    }

    async fn sold_seats(&self, schedule_id: i32) -> Result<Vec<String>, BoxError> {
        let tables = lock(&self.shared.tables);
        let sold: BTreeSet<String> = tables
            .links
            .iter()
            .filter(|(tx_id, _)| {
                tables
                    .transactions
                    .get(tx_id)
                    .is_some_and(|row| row.schedule_id == schedule_id && row.paid_at.is_some())
            })
            .filter_map(|(_, seat_id)| tables.seat_codes.get(seat_id).cloned())
            .collect();
        Ok(sold.into_iter().collect())
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionHistory>, BoxError> {
        let tables = lock(&self.shared.tables);
        let mut rows: Vec<(&Uuid, &TransactionRow)> = tables
            .transactions
            .iter()
            .filter(|(_, row)| row.user_id == user_id)
            .collect();
        rows.sort_by(|a, b| {
            b.1.updated_at
                .cmp(&a.1.updated_at)
                .then(b.1.revision.cmp(&a.1.revision))
        });

        let mut history = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            let Some(schedule) = tables.schedules.get(&row.schedule_id) else {
                continue;
            };
            let seats: Vec<String> = tables
                .links
                .iter()
                .filter(|(tx_id, _)| tx_id == id)
                .filter_map(|(_, seat_id)| tables.seat_codes.get(seat_id).cloned())
                .collect();
            if seats.is_empty() {
                continue;
            }
            history.push(TransactionHistory {
                id: *id,
                cinema: schedule.cinema_name.clone(),
                cinema_img: schedule.cinema_img.clone(),
                show_date: schedule.show_date,
                title: schedule.title.clone(),
                age_rating: None,
                start_at: schedule.start_at,
                seats,
                total_payment: row.total_payment,
                phone_number: row.phone_number.clone(),
                paid_at: row.paid_at,
                updated_at: row.updated_at,
                scanned_at: row.scanned_at,
                schedule_id: row.schedule_id,
            });
        }
        Ok(history)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MovieRecord {
    details: MovieDetails,
    genre_ids: Vec<i32>,
    archived_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MovieRecord {
    fn listing(&self) -> Movie {
        let d = &self.details;
        Movie {
            id: d.id,
            title: d.title.clone(),
            synopsis: d.synopsis.clone(),
            poster_img: d.poster_img.clone(),
            backdrop_img: d.backdrop_img.clone(),
            duration_minutes: d.duration_minutes,
            release_date: d.release_date,
            genres: d.genres.clone(),
        }
    }

    fn summary(&self) -> MovieSummary {
        MovieSummary {
            id: self.details.id,
            title: self.details.title.clone(),
            release_date: self.details.release_date,
            duration_minutes: self.details.duration_minutes,
        }
    }
}

#[derive(Default)]
struct CatalogTables {
    movies: HashMap<i32, MovieRecord>,
    genres: HashMap<String, i32>,
    schedules: Vec<Schedule>,
    paid_bookings: HashMap<i32, u32>,
}

impl CatalogTables {
    fn genre_id(&mut self, name: &str) -> i32 {
        let next = self.genres.len() as i32 + 1;
        *self.genres.entry(name.to_string()).or_insert(next)
    }

    fn replace_schedules(&mut self, movie_id: i32, title: &str, movie: &NewMovie, next_id: &AtomicI32) {
        self.schedules.retain(|s| s.movie_id != movie_id);
        for slot in movie.schedule.slots() {
            self.schedules.push(Schedule {
                id: next_id.fetch_add(1, Ordering::SeqCst) + 1,
                movie_id,
                title: title.to_string(),
                city_id: slot.city_id,
                city_name: format!("city-{}", slot.city_id),
                show_time_id: slot.show_time_id,
                start_at: chrono::NaiveTime::MIN,
                cinema_id: slot.cinema_id,
                cinema_name: format!("cinema-{}", slot.cinema_id),
                cinema_img: None,
                show_date: slot.show_date,
            });
        }
    }
}

/// Number of store round trips per read path.
#[derive(Debug, Default)]
pub struct FetchCounters {
    pub upcoming: AtomicUsize,
    pub popular: AtomicUsize,
    pub filtered: AtomicUsize,
}

impl FetchCounters {
    pub fn upcoming(&self) -> usize {
        self.upcoming.load(Ordering::SeqCst)
    }

    pub fn popular(&self) -> usize {
        self.popular.load(Ordering::SeqCst)
    }

    pub fn filtered(&self) -> usize {
        self.filtered.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct MemoryCatalogStore {
    tables: Arc<Mutex<CatalogTables>>,
    next_movie_id: Arc<AtomicI32>,
    next_schedule_id: Arc<AtomicI32>,
    today: NaiveDate,
    pub fetches: Arc<FetchCounters>,
}

impl MemoryCatalogStore {
    /// `today` anchors "upcoming" and "showing" comparisons.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            tables: Arc::new(Mutex::new(CatalogTables::default())),
            next_movie_id: Arc::new(AtomicI32::new(0)),
            next_schedule_id: Arc::new(AtomicI32::new(0)),
            today,
            fetches: Arc::new(FetchCounters::default()),
        }
    }

    /// Counts a paid booking towards a title's popularity.
    pub fn record_paid_booking(&self, movie_id: i32) {
        *lock(&self.tables).paid_bookings.entry(movie_id).or_default() += 1;
    }

    pub fn schedules_for(&self, movie_id: i32) -> Vec<Schedule> {
        lock(&self.tables)
            .schedules
            .iter()
            .filter(|s| s.movie_id == movie_id)
            .cloned()
            .collect()
    }

    fn active(tables: &CatalogTables) -> impl Iterator<Item = &MovieRecord> {
        tables.movies.values().filter(|m| m.archived_at.is_none())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upcoming_movies(&self) -> Result<Vec<Movie>, BoxError> {
        self.fetches.upcoming.fetch_add(1, Ordering::SeqCst);
        let tables = lock(&self.tables);
        let mut movies: Vec<Movie> = Self::active(&tables)
            .filter(|m| m.details.release_date > self.today)
            .map(MovieRecord::listing)
            .collect();
        movies.sort_by_key(|m| (m.release_date, m.id));
        Ok(movies)
    }

    async fn popular_movies(&self) -> Result<Vec<Movie>, BoxError> {
        self.fetches.popular.fetch_add(1, Ordering::SeqCst);
        let tables = lock(&self.tables);
        let showing: HashSet<i32> = tables
            .schedules
            .iter()
            .filter(|s| s.show_date >= self.today)
            .map(|s| s.movie_id)
            .collect();
        let mut movies: Vec<Movie> = Self::active(&tables)
            .filter(|m| {
                showing.contains(&m.details.id) && tables.paid_bookings.contains_key(&m.details.id)
            })
            .map(MovieRecord::listing)
            .collect();
        let paid = |id: &i32| tables.paid_bookings.get(id).copied().unwrap_or_default();
        movies.sort_by(|a, b| {
            paid(&b.id)
                .cmp(&paid(&a.id))
                .then(a.release_date.cmp(&b.release_date))
                .then(a.id.cmp(&b.id))
        });
        Ok(movies)
    }

    async fn filter_movies(&self, filter: &MovieFilter) -> Result<Vec<Movie>, BoxError> {
        self.fetches.filtered.fetch_add(1, Ordering::SeqCst);
        let tables = lock(&self.tables);
        let keywords: Vec<String> = filter.keywords.iter().map(|k| k.to_lowercase()).collect();
        let mut movies: Vec<Movie> = Self::active(&tables)
            .filter(|m| {
                let title = m.details.title.to_lowercase();
                keywords.is_empty() || keywords.iter().any(|k| title.contains(k.as_str()))
            })
            .filter(|m| {
                filter.genre_ids.is_empty() || m.genre_ids.iter().any(|g| filter.genre_ids.contains(g))
            })
            .map(MovieRecord::listing)
            .collect();
        movies.sort_by_key(|m| (m.release_date, m.id));
        Ok(movies
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn movie_details(&self, movie_id: i32) -> Result<Option<MovieDetails>, BoxError> {
        Ok(lock(&self.tables)
            .movies
            .get(&movie_id)
            .map(|m| m.details.clone()))
    }

    async fn list_all_movies(&self, offset: i64) -> Result<Vec<MovieListing>, BoxError> {
        let tables = lock(&self.tables);
        let mut records: Vec<&MovieRecord> = Self::active(&tables).collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.details.id.cmp(&a.details.id)));
        Ok(records
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(10)
            .map(|m| MovieListing {
                id: m.details.id,
                title: m.details.title.clone(),
                poster_img: m.details.poster_img.clone(),
                release_date: m.details.release_date,
                genres: m.details.genres.clone(),
                duration_minutes: m.details.duration_minutes,
                created_at: m.created_at,
                updated_at: m.updated_at,
            })
            .collect())
    }

    async fn archive_movie(&self, movie_id: i32) -> Result<Option<ArchivedMovie>, BoxError> {
        let mut tables = lock(&self.tables);
        let Some(record) = tables.movies.get_mut(&movie_id) else {
            return Ok(None);
        };
        let now = Utc::now();
        record.archived_at = Some(now);
        record.updated_at = now;
        Ok(Some(ArchivedMovie {
            id: movie_id,
            title: record.details.title.clone(),
            archived_at: now,
        }))
    }

    async fn create_movie(&self, movie: &NewMovie) -> Result<MovieSummary, BoxError> {
        let mut tables = lock(&self.tables);
        let id = self.next_movie_id.fetch_add(1, Ordering::SeqCst) + 1;
        let genre_ids = movie.genres.iter().map(|g| tables.genre_id(g)).collect();
        let mut genres = movie.genres.clone();
        genres.sort();
        let mut cast = movie.cast.clone();
        cast.sort();
        let now = Utc::now();

        let record = MovieRecord {
            details: MovieDetails {
                id,
                title: movie.title.clone(),
                synopsis: movie.synopsis.clone(),
                poster_img: movie.poster_img.clone(),
                backdrop_img: movie.backdrop_img.clone(),
                duration_minutes: movie.duration_minutes,
                release_date: movie.release_date,
                age_rating_id: movie.age_rating_id,
                genres,
                director: movie.director.clone(),
                cast,
            },
            genre_ids,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        let summary = record.summary();
        tables.replace_schedules(id, &movie.title, movie, &self.next_schedule_id);
        tables.movies.insert(id, record);
        Ok(summary)
    }

    async fn edit_movie(
        &self,
        movie_id: i32,
        movie: &NewMovie,
    ) -> Result<Option<MovieSummary>, BoxError> {
        let mut tables = lock(&self.tables);
        if !tables.movies.contains_key(&movie_id) {
            return Ok(None);
        }
        let genre_ids: Vec<i32> = movie.genres.iter().map(|g| tables.genre_id(g)).collect();
        tables.replace_schedules(movie_id, &movie.title, movie, &self.next_schedule_id);

        let Some(record) = tables.movies.get_mut(&movie_id) else {
            return Ok(None);
        };
        let d = &mut record.details;
        d.title = movie.title.clone();
        d.synopsis = movie.synopsis.clone();
        d.age_rating_id = movie.age_rating_id;
        d.release_date = movie.release_date;
        d.duration_minutes = movie.duration_minutes;
        if movie.poster_img.is_some() {
            d.poster_img = movie.poster_img.clone();
        }
        if movie.backdrop_img.is_some() {
            d.backdrop_img = movie.backdrop_img.clone();
        }
        if movie.director.is_some() {
            d.director = movie.director.clone();
        }
        if !movie.genres.is_empty() {
            let mut genres = movie.genres.clone();
            genres.sort();
            d.genres = genres;
            record.genre_ids = genre_ids;
        }
        if !movie.cast.is_empty() {
            let mut cast = movie.cast.clone();
            cast.sort();
            d.cast = cast;
        }
        record.updated_at = Utc::now();
        Ok(Some(record.summary()))
    }

    async fn filter_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, BoxError> {
        let show_date = match filter.show_date {
            Some(date) => date,
            None => self
                .today
                .checked_add_days(Days::new(1))
                .ok_or("show date out of range")?,
        };
        let tables = lock(&self.tables);
        let mut schedules: Vec<Schedule> = tables
            .schedules
            .iter()
            .filter(|s| s.show_date == show_date)
            .filter(|s| filter.movie_id.map_or(true, |id| s.movie_id == id))
            .filter(|s| filter.city_id.map_or(true, |id| s.city_id == id))
            .filter(|s| filter.show_time_id.map_or(true, |id| s.show_time_id == id))
            .cloned()
            .collect();
        schedules.sort_by_key(|s| (s.show_time_id, s.cinema_id));
        Ok(schedules)
    }
}
