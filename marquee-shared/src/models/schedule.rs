use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Number of consecutive days a schedule plan covers.
pub const SCHEDULE_WINDOW_DAYS: u64 = 7;

/// One screening: a title at a cinema in a city, at a show time on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i32,
    pub movie_id: i32,
    pub title: String,
    pub city_id: i32,
    pub city_name: String,
    pub show_time_id: i32,
    pub start_at: NaiveTime,
    pub cinema_id: i32,
    pub cinema_name: String,
    pub cinema_img: Option<String>,
    pub show_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFilter {
    pub movie_id: Option<i32>,
    pub city_id: Option<i32>,
    pub show_time_id: Option<i32>,
    /// Defaults to tomorrow when absent.
    pub show_date: Option<NaiveDate>,
}

/// Screenings to generate for a title: every city x cinema x show time,
/// on each day of the window starting at `first_show_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePlan {
    pub first_show_date: NaiveDate,
    #[serde(default)]
    pub city_ids: Vec<i32>,
    #[serde(default)]
    pub cinema_ids: Vec<i32>,
    #[serde(default)]
    pub show_time_ids: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSlot {
    pub show_date: NaiveDate,
    pub city_id: i32,
    pub cinema_id: i32,
    pub show_time_id: i32,
}

impl SchedulePlan {
    pub fn is_empty(&self) -> bool {
        self.city_ids.is_empty() || self.cinema_ids.is_empty() || self.show_time_ids.is_empty()
    }

    /// Last day of the window, or `None` when the window runs past the
    /// calendar range.
    pub fn last_show_date(&self) -> Option<NaiveDate> {
        self.first_show_date
            .checked_add_days(Days::new(SCHEDULE_WINDOW_DAYS - 1))
    }

    /// Expands the plan into concrete slots, ordered by day, city, cinema, show time.
    pub fn slots(&self) -> Vec<ScheduleSlot> {
        if self.is_empty() || self.last_show_date().is_none() {
            return Vec::new();
        }

        let mut slots = Vec::with_capacity(
            SCHEDULE_WINDOW_DAYS as usize
                * self.city_ids.len()
                * self.cinema_ids.len()
                * self.show_time_ids.len(),
        );

        for day in 0..SCHEDULE_WINDOW_DAYS {
            let Some(show_date) = self.first_show_date.checked_add_days(Days::new(day)) else {
                break;
            };
            for &city_id in &self.city_ids {
                for &cinema_id in &self.cinema_ids {
                    for &show_time_id in &self.show_time_ids {
                        slots.push(ScheduleSlot {
                            show_date,
                            city_id,
                            cinema_id,
                            show_time_id,
                        });
                    }
                }
            }
        }

        slots
    }
}
