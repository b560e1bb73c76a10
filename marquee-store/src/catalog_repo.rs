use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use marquee_core::repository::CatalogStore;
use marquee_core::BoxError;
use marquee_shared::{
    ArchivedMovie, Movie, MovieDetails, MovieFilter, MovieListing, MovieSummary, NewMovie,
    Schedule, ScheduleFilter, SchedulePlan,
};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::debug;

pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct MovieRow {
    id: i32,
    title: String,
    synopsis: Option<String>,
    poster_img: Option<String>,
    backdrop_img: Option<String>,
    duration_minutes: Option<i32>,
    release_date: NaiveDate,
    genres: Vec<String>,
}

impl From<MovieRow> for Movie {
    fn from(row: MovieRow) -> Self {
        Movie {
            id: row.id,
            title: row.title,
            synopsis: row.synopsis,
            poster_img: row.poster_img,
            backdrop_img: row.backdrop_img,
            duration_minutes: row.duration_minutes,
            release_date: row.release_date,
            genres: row.genres,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DetailsRow {
    id: i32,
    title: String,
    synopsis: Option<String>,
    poster_img: Option<String>,
    backdrop_img: Option<String>,
    duration_minutes: Option<i32>,
    release_date: NaiveDate,
    age_rating_id: Option<i32>,
    genres: Vec<String>,
    director: Option<String>,
    cast: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: i32,
    title: String,
    poster_img: Option<String>,
    release_date: NaiveDate,
    genres: Vec<String>,
    duration_minutes: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ArchivedRow {
    id: i32,
    title: String,
    archived_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i32,
    movie_id: i32,
    title: String,
    city_id: i32,
    city_name: String,
    show_time_id: i32,
    start_at: NaiveTime,
    cinema_id: i32,
    cinema_name: String,
    cinema_img: Option<String>,
    show_date: NaiveDate,
}

const UPSERT_GENRE: &str = r#"
    WITH ins AS (
        INSERT INTO genres (name) VALUES ($1)
        ON CONFLICT (name) DO NOTHING
        RETURNING id
    )
    SELECT id FROM ins
    UNION
    SELECT id FROM genres WHERE name = $1
"#;

const UPSERT_PERSON: &str = r#"
    WITH ins AS (
        INSERT INTO people (name) VALUES ($1)
        ON CONFLICT (name) DO NOTHING
        RETURNING id
    )
    SELECT id FROM ins
    UNION
    SELECT id FROM people WHERE name = $1
"#;

/// Escapes `ILIKE` metacharacters so keywords match literally.
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Keyword and genre predicates are only added when the filter carries them;
/// paging is always bound last.
pub(crate) fn movie_filter_query(filter: &MovieFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        r#"
        SELECT
            m.id, m.title, m.synopsis, m.poster_img, m.backdrop_img, m.duration_minutes, m.release_date,
            COALESCE(ARRAY_AGG(DISTINCT g.name ORDER BY g.name) FILTER (WHERE g.name IS NOT NULL), '{}') AS genres
        FROM movies m
        LEFT JOIN movie_genres mg ON m.id = mg.movie_id
        LEFT JOIN genres g ON mg.genre_id = g.id
        WHERE m.archived_at IS NULL"#,
    );

    if !filter.keywords.is_empty() {
        qb.push(" AND EXISTS (SELECT 1 FROM UNNEST(");
        qb.push_bind(
            filter
                .keywords
                .iter()
                .map(|k| escape_like(k))
                .collect::<Vec<_>>(),
        );
        qb.push(r"::text[]) kw WHERE m.title ILIKE '%' || kw || '%' ESCAPE '\')");
    }

    // EXISTS keeps the aggregated genre list complete for matching titles.
    if !filter.genre_ids.is_empty() {
        qb.push(" AND EXISTS (SELECT 1 FROM movie_genres fg WHERE fg.movie_id = m.id AND fg.genre_id = ANY(");
        qb.push_bind(filter.genre_ids.clone());
        qb.push("::int[]))");
    }

    qb.push(" GROUP BY m.id ORDER BY m.release_date ASC, m.id ASC OFFSET ");
    qb.push_bind(filter.offset);
    qb.push(" LIMIT ");
    qb.push_bind(filter.limit);
    qb
}

async fn upsert_names(
    conn: &mut PgConnection,
    sql: &'static str,
    names: &[String],
) -> Result<Vec<i32>, sqlx::Error> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let id: i32 = sqlx::query_scalar(sql)
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        ids.push(id);
    }
    Ok(ids)
}

async fn link_genres(conn: &mut PgConnection, movie_id: i32, genre_ids: &[i32]) -> Result<(), sqlx::Error> {
    if genre_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO movie_genres (movie_id, genre_id)
        SELECT $1, UNNEST($2::int[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(movie_id)
    .bind(genre_ids)
    .execute(conn)
    .await?;
    Ok(())
}

async fn link_actors(conn: &mut PgConnection, movie_id: i32, actor_ids: &[i32]) -> Result<(), sqlx::Error> {
    if actor_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO movie_actors (movie_id, actor_id)
        SELECT $1, UNNEST($2::int[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(movie_id)
    .bind(actor_ids)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts one schedule row per slot of the plan. Returns the row count.
async fn insert_schedules(
    conn: &mut PgConnection,
    movie_id: i32,
    plan: &SchedulePlan,
) -> Result<u64, sqlx::Error> {
    let slots = plan.slots();
    if slots.is_empty() {
        debug!(movie_id, "empty schedule plan, no schedules created");
        return Ok(0);
    }

    let mut city_ids = Vec::with_capacity(slots.len());
    let mut show_time_ids = Vec::with_capacity(slots.len());
    let mut cinema_ids = Vec::with_capacity(slots.len());
    let mut show_dates = Vec::with_capacity(slots.len());
    for slot in &slots {
        city_ids.push(slot.city_id);
        show_time_ids.push(slot.show_time_id);
        cinema_ids.push(slot.cinema_id);
        show_dates.push(slot.show_date);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO schedules (movie_id, city_id, show_time_id, cinema_id, show_date)
        SELECT $1, * FROM UNNEST($2::int[], $3::int[], $4::int[], $5::date[])
        "#,
    )
    .bind(movie_id)
    .bind(city_ids)
    .bind(show_time_ids)
    .bind(cinema_ids)
    .bind(show_dates)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn upcoming_movies(&self) -> Result<Vec<Movie>, BoxError> {
        let rows = sqlx::query_as::<_, MovieRow>(
            r#"
            SELECT
                m.id, m.title, m.synopsis, m.poster_img, m.backdrop_img, m.duration_minutes, m.release_date,
                COALESCE(ARRAY_AGG(g.name ORDER BY g.name) FILTER (WHERE g.name IS NOT NULL), '{}') AS genres
            FROM movies m
            LEFT JOIN movie_genres mg ON m.id = mg.movie_id
            LEFT JOIN genres g ON mg.genre_id = g.id
            WHERE m.release_date > CURRENT_DATE AND m.archived_at IS NULL
            GROUP BY m.id
            ORDER BY m.release_date ASC, m.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Movie::from).collect())
    }

    async fn popular_movies(&self) -> Result<Vec<Movie>, BoxError> {
        let rows = sqlx::query_as::<_, MovieRow>(
            r#"
            WITH ranked AS (
                SELECT s.movie_id, COUNT(DISTINCT t.id) AS paid_count
                FROM transactions t
                JOIN schedules s ON t.schedule_id = s.id
                WHERE s.show_date >= CURRENT_DATE AND t.paid_at IS NOT NULL
                GROUP BY s.movie_id
            )
            SELECT
                m.id, m.title, m.synopsis, m.poster_img, m.backdrop_img, m.duration_minutes, m.release_date,
                COALESCE(ARRAY_AGG(g.name ORDER BY g.name) FILTER (WHERE g.name IS NOT NULL), '{}') AS genres
            FROM movies m
            JOIN ranked r ON r.movie_id = m.id
            LEFT JOIN movie_genres mg ON m.id = mg.movie_id
            LEFT JOIN genres g ON mg.genre_id = g.id
            WHERE m.archived_at IS NULL
            GROUP BY m.id, r.paid_count
            ORDER BY r.paid_count DESC, m.release_date ASC, m.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Movie::from).collect())
    }

    async fn filter_movies(&self, filter: &MovieFilter) -> Result<Vec<Movie>, BoxError> {
        let mut qb = movie_filter_query(filter);
        let rows = qb
            .build_query_as::<MovieRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Movie::from).collect())
    }

    async fn movie_details(&self, movie_id: i32) -> Result<Option<MovieDetails>, BoxError> {
        let row = sqlx::query_as::<_, DetailsRow>(
            r#"
            SELECT
                m.id, m.title, m.synopsis, m.poster_img, m.backdrop_img, m.duration_minutes,
                m.release_date, m.age_rating_id,
                COALESCE(ARRAY_AGG(DISTINCT g.name ORDER BY g.name) FILTER (WHERE g.name IS NOT NULL), '{}') AS genres,
                d.name AS director,
                COALESCE(ARRAY_AGG(DISTINCT a.name ORDER BY a.name) FILTER (WHERE a.name IS NOT NULL), '{}') AS "cast"
            FROM movies m
            LEFT JOIN people d ON m.director_id = d.id
            LEFT JOIN movie_genres mg ON m.id = mg.movie_id
            LEFT JOIN genres g ON mg.genre_id = g.id
            LEFT JOIN movie_actors ma ON m.id = ma.movie_id
            LEFT JOIN people a ON ma.actor_id = a.id
            WHERE m.id = $1
            GROUP BY m.id, d.name
            "#,
        )
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| MovieDetails {
            id: r.id,
            title: r.title,
            synopsis: r.synopsis,
            poster_img: r.poster_img,
            backdrop_img: r.backdrop_img,
            duration_minutes: r.duration_minutes,
            release_date: r.release_date,
            age_rating_id: r.age_rating_id,
            genres: r.genres,
            director: r.director,
            cast: r.cast,
        }))
    }

    async fn list_all_movies(&self, offset: i64) -> Result<Vec<MovieListing>, BoxError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT
                m.id, m.title, m.poster_img, m.release_date,
                COALESCE(ARRAY_AGG(DISTINCT g.name ORDER BY g.name) FILTER (WHERE g.name IS NOT NULL), '{}') AS genres,
                m.duration_minutes, m.created_at, m.updated_at
            FROM movies m
            LEFT JOIN movie_genres mg ON m.id = mg.movie_id
            LEFT JOIN genres g ON mg.genre_id = g.id
            WHERE m.archived_at IS NULL
            GROUP BY m.id
            ORDER BY m.updated_at DESC, m.id DESC
            LIMIT 10 OFFSET $1
            "#,
        )
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MovieListing {
                id: r.id,
                title: r.title,
                poster_img: r.poster_img,
                release_date: r.release_date,
                genres: r.genres,
                duration_minutes: r.duration_minutes,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect())
    }

    async fn archive_movie(&self, movie_id: i32) -> Result<Option<ArchivedMovie>, BoxError> {
        let row = sqlx::query_as::<_, ArchivedRow>(
            r#"
            UPDATE movies
            SET archived_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING id, title, archived_at
            "#,
        )
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ArchivedMovie {
            id: r.id,
            title: r.title,
            archived_at: r.archived_at,
        }))
    }

    async fn create_movie(&self, movie: &NewMovie) -> Result<MovieSummary, BoxError> {
        let mut tx = self.pool.begin().await?;

        let genre_ids = upsert_names(&mut tx, UPSERT_GENRE, &movie.genres).await?;
        let actor_ids = upsert_names(&mut tx, UPSERT_PERSON, &movie.cast).await?;
        let director_id = match &movie.director {
            Some(director) => upsert_names(&mut tx, UPSERT_PERSON, std::slice::from_ref(director))
                .await?
                .first()
                .copied(),
            None => None,
        };

        let movie_id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO movies (
                poster_img, backdrop_img, title, age_rating_id, release_date,
                duration_minutes, director_id, synopsis
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&movie.poster_img)
        .bind(&movie.backdrop_img)
        .bind(&movie.title)
        .bind(movie.age_rating_id)
        .bind(movie.release_date)
        .bind(movie.duration_minutes)
        .bind(director_id)
        .bind(&movie.synopsis)
        .fetch_one(&mut *tx)
        .await?;

        link_genres(&mut tx, movie_id, &genre_ids).await?;
        link_actors(&mut tx, movie_id, &actor_ids).await?;
        let schedules = insert_schedules(&mut tx, movie_id, &movie.schedule).await?;

        tx.commit().await?;
        debug!(movie_id, schedules, "movie rows committed");

        Ok(MovieSummary {
            id: movie_id,
            title: movie.title.clone(),
            release_date: movie.release_date,
            duration_minutes: movie.duration_minutes,
        })
    }

    async fn edit_movie(
        &self,
        movie_id: i32,
        movie: &NewMovie,
    ) -> Result<Option<MovieSummary>, BoxError> {
        let mut tx = self.pool.begin().await?;

        let updated: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE movies
            SET
                title = $1,
                age_rating_id = $2,
                release_date = $3,
                duration_minutes = $4,
                synopsis = $5,
                poster_img = COALESCE($6, poster_img),
                backdrop_img = COALESCE($7, backdrop_img),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $8
            RETURNING id
            "#,
        )
        .bind(&movie.title)
        .bind(movie.age_rating_id)
        .bind(movie.release_date)
        .bind(movie.duration_minutes)
        .bind(&movie.synopsis)
        .bind(&movie.poster_img)
        .bind(&movie.backdrop_img)
        .bind(movie_id)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            return Ok(None);
        }

        if let Some(director) = &movie.director {
            let ids = upsert_names(&mut tx, UPSERT_PERSON, std::slice::from_ref(director)).await?;
            sqlx::query("UPDATE movies SET director_id = $1 WHERE id = $2")
                .bind(ids.first().copied())
                .bind(movie_id)
                .execute(&mut *tx)
                .await?;
        }

        if !movie.genres.is_empty() {
            let genre_ids = upsert_names(&mut tx, UPSERT_GENRE, &movie.genres).await?;
            sqlx::query("DELETE FROM movie_genres WHERE movie_id = $1")
                .bind(movie_id)
                .execute(&mut *tx)
                .await?;
            link_genres(&mut tx, movie_id, &genre_ids).await?;
        }

        if !movie.cast.is_empty() {
            let actor_ids = upsert_names(&mut tx, UPSERT_PERSON, &movie.cast).await?;
            sqlx::query("DELETE FROM movie_actors WHERE movie_id = $1")
                .bind(movie_id)
                .execute(&mut *tx)
                .await?;
            link_actors(&mut tx, movie_id, &actor_ids).await?;
        }

        sqlx::query("DELETE FROM schedules WHERE movie_id = $1")
            .bind(movie_id)
            .execute(&mut *tx)
            .await?;
        let schedules = insert_schedules(&mut tx, movie_id, &movie.schedule).await?;

        tx.commit().await?;
        debug!(movie_id, schedules, "movie edit committed");

        Ok(Some(MovieSummary {
            id: movie_id,
            title: movie.title.clone(),
            release_date: movie.release_date,
            duration_minutes: movie.duration_minutes,
        }))
    }

    async fn filter_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, BoxError> {
        let rows = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT
                s.id,
                s.movie_id,
                m.title,
                s.city_id,
                ci.name AS city_name,
                s.show_time_id,
                st.start_at,
                s.cinema_id,
                c.name AS cinema_name,
                c.img AS cinema_img,
                s.show_date
            FROM schedules s
            JOIN movies m ON s.movie_id = m.id
            JOIN cities ci ON s.city_id = ci.id
            JOIN show_times st ON s.show_time_id = st.id
            JOIN cinemas c ON s.cinema_id = c.id
            WHERE s.show_date = COALESCE($4::date, CURRENT_DATE + 1)
                AND ($1::int IS NULL OR s.movie_id = $1)
                AND ($2::int IS NULL OR s.city_id = $2)
                AND ($3::int IS NULL OR s.show_time_id = $3)
            ORDER BY s.show_time_id, s.cinema_id
            "#,
        )
        .bind(filter.movie_id)
        .bind(filter.city_id)
        .bind(filter.show_time_id)
        .bind(filter.show_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Schedule {
                id: r.id,
                movie_id: r.movie_id,
                title: r.title,
                city_id: r.city_id,
                city_name: r.city_name,
                show_time_id: r.show_time_id,
                start_at: r.start_at,
                cinema_id: r.cinema_id,
                cinema_name: r.cinema_name,
                cinema_img: r.cinema_img,
                show_date: r.show_date,
            })
            .collect())
    }
}
