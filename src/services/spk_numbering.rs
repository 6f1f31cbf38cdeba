//! SPK document numbering: `NNN/SPK/<ROMAN-MONTH>/<YYYY>`.
//!
//! Sequences are scoped to a calendar (year, month) and handed out from the
//! `spk_sequences` row for that month: the row is claimed, then bumped with a
//! single atomic `UPDATE`. Both run inside the caller's transaction, so a
//! create that rolls back releases the row lock without consuming a number.

use crate::entities::{spk, spk_sequence};
use crate::errors::ServiceError;
use chrono::{DateTime, Datelike, FixedOffset, Offset, TimeZone, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, instrument};

/// Series token embedded in every number.
pub const SPK_SERIES: &str = "SPK";

// Index 0 is unused so months index directly.
const ROMAN_MONTHS: [&str; 13] = [
    "", "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

/// Roman-numeral token for a 1-based month.
pub fn roman_month(month: u32) -> Option<&'static str> {
    if month == 0 {
        return None;
    }
    ROMAN_MONTHS.get(month as usize).copied()
}

fn month_from_roman(token: &str) -> Option<u32> {
    ROMAN_MONTHS
        .iter()
        .skip(1)
        .position(|roman| *roman == token)
        .map(|idx| idx as u32 + 1)
}

/// A calendar month in the numbering time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumberingPeriod {
    pub year: i32,
    pub month: u32,
}

impl NumberingPeriod {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12)
            .contains(&month)
            .then_some(Self { year, month })
    }

    pub fn from_timestamp(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First instant of the month, as UTC.
    pub fn start_utc(self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        offset
            .with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// First instant of the following month (exclusive bound), as UTC.
    pub fn end_utc(self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        self.next().start_utc(offset)
    }
}

/// A parsed or freshly minted SPK number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpkNumber {
    pub sequence: u32,
    pub month: u32,
    pub year: i32,
}

impl SpkNumber {
    pub fn new(sequence: u32, period: NumberingPeriod) -> Self {
        Self {
            sequence,
            month: period.month,
            year: period.year,
        }
    }

    pub fn period(&self) -> NumberingPeriod {
        NumberingPeriod {
            year: self.year,
            month: self.month,
        }
    }
}

impl fmt::Display for SpkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}/{}/{}/{}",
            self.sequence,
            SPK_SERIES,
            roman_month(self.month).unwrap_or("?"),
            self.year
        )
    }
}

impl FromStr for SpkNumber {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::InvalidInput(format!("Invalid SPK number: {}", s));

        let parts: Vec<&str> = s.split('/').collect();
        let [seq, series, roman, year] = parts.as_slice() else {
            return Err(invalid());
        };
        if *series != SPK_SERIES || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let sequence: u32 = seq.parse().map_err(|_| invalid())?;
        let month = month_from_roman(roman).ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;

        let number = SpkNumber {
            sequence,
            month,
            year,
        };
        // Only the canonical rendering is accepted ("1/SPK/I/2024" is not).
        if sequence == 0 || number.to_string() != s {
            return Err(invalid());
        }
        Ok(number)
    }
}

/// Mints SPK numbers from the per-month counter.
#[derive(Debug, Clone, Copy)]
pub struct SpkNumberGenerator {
    offset: FixedOffset,
}

impl Default for SpkNumberGenerator {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl SpkNumberGenerator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn period_for(&self, now: DateTime<Utc>) -> NumberingPeriod {
        NumberingPeriod::from_timestamp(now, self.offset)
    }

    /// Issues the next number for the month containing `now`.
    ///
    /// `conn` must be the transaction that will also insert the SPK.
    /// Any storage failure is reported as [`ServiceError::NumberGeneration`].
    #[instrument(skip(self, conn), fields(year, month))]
    pub async fn generate_number<C>(
        &self,
        conn: &C,
        now: DateTime<Utc>,
    ) -> Result<SpkNumber, ServiceError>
    where
        C: ConnectionTrait,
    {
        let period = self.period_for(now);
        tracing::Span::current()
            .record("year", period.year)
            .record("month", period.month);

        let sequence = self.next_sequence(conn, period, now).await.map_err(|e| {
            error!(
                year = period.year,
                month = period.month,
                error = %e,
                "SPK number generation failed"
            );
            ServiceError::NumberGeneration(e.to_string())
        })?;

        let number = SpkNumber::new(sequence, period);
        debug!(spk_number = %number, "Issued SPK number");
        Ok(number)
    }

    async fn next_sequence<C>(
        &self,
        conn: &C,
        period: NumberingPeriod,
        now: DateTime<Utc>,
    ) -> Result<u32, ServiceError>
    where
        C: ConnectionTrait,
    {
        let (start, end) = period
            .start_utc(self.offset)
            .zip(period.end_utc(self.offset))
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Month {}-{:02} is out of range",
                    period.year, period.month
                ))
            })?;

        // Claim the month's row before reading anything. On SQLite this makes
        // the first statement a write, so the writer lock is taken (or waited
        // for) up front instead of failing on a read-to-write upgrade.
        let claim = spk_sequence::ActiveModel {
            year: Set(period.year),
            month: Set(period.month as i32),
            last_value: Set(0),
            updated_at: Set(now),
        };
        spk_sequence::Entity::insert(claim)
            .on_conflict(
                OnConflict::columns([spk_sequence::Column::Year, spk_sequence::Column::Month])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        // Seeds the counter for months that already hold rows but no counter.
        let existing = spk::Entity::find()
            .filter(spk::Column::CreatedAt.gte(start))
            .filter(spk::Column::CreatedAt.lt(end))
            .count(conn)
            .await?;

        let next = Expr::case(
            Expr::col(spk_sequence::Column::LastValue).eq(0i64),
            Expr::val(existing as i64 + 1),
        )
        .finally(Expr::col(spk_sequence::Column::LastValue).add(1i64));

        spk_sequence::Entity::update_many()
            .col_expr(spk_sequence::Column::LastValue, next.into())
            .col_expr(spk_sequence::Column::UpdatedAt, Expr::value(now))
            .filter(spk_sequence::Column::Year.eq(period.year))
            .filter(spk_sequence::Column::Month.eq(period.month as i32))
            .exec(conn)
            .await?;

        let row = spk_sequence::Entity::find_by_id((period.year, period.month as i32))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError("Sequence row missing after upsert".to_string())
            })?;

        u32::try_from(row.last_value).map_err(|_| {
            ServiceError::InternalError(format!("Sequence value {} out of range", row.last_value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, "I")]
    #[case(2, "II")]
    #[case(3, "III")]
    #[case(4, "IV")]
    #[case(5, "V")]
    #[case(6, "VI")]
    #[case(7, "VII")]
    #[case(8, "VIII")]
    #[case(9, "IX")]
    #[case(10, "X")]
    #[case(11, "XI")]
    #[case(12, "XII")]
    fn roman_months_are_exact(#[case] month: u32, #[case] expected: &str) {
        assert_eq!(roman_month(month), Some(expected));
        assert_eq!(month_from_roman(expected), Some(month));
    }

    #[test]
    fn roman_month_rejects_out_of_range() {
        assert_eq!(roman_month(0), None);
        assert_eq!(roman_month(13), None);
        assert_eq!(month_from_roman(""), None);
    }

    #[test]
    fn formats_with_zero_padding() {
        let period = NumberingPeriod::new(2024, 1).unwrap();
        assert_eq!(SpkNumber::new(1, period).to_string(), "001/SPK/I/2024");
        assert_eq!(SpkNumber::new(42, period).to_string(), "042/SPK/I/2024");
        assert_eq!(SpkNumber::new(1234, period).to_string(), "1234/SPK/I/2024");
    }

    #[rstest]
    #[case("TMP/SPK/I/2024/1704067200000")]
    #[case("000/SPK/I/2024")]
    #[case("1/SPK/I/2024")]
    #[case("001/SPK/XIII/2024")]
    #[case("001/SPK/i/2024")]
    #[case("001/ORD/I/2024")]
    #[case("-01/SPK/I/2024")]
    #[case("001/SPK/I")]
    fn parse_rejects_non_canonical(#[case] raw: &str) {
        assert!(raw.parse::<SpkNumber>().is_err(), "{raw} should be rejected");
    }

    #[test]
    fn parse_accepts_canonical() {
        let number: SpkNumber = "017/SPK/IX/2023".parse().unwrap();
        assert_eq!(
            number,
            SpkNumber {
                sequence: 17,
                month: 9,
                year: 2023
            }
        );
        assert_eq!(number.period(), NumberingPeriod::new(2023, 9).unwrap());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let dec = NumberingPeriod::new(2023, 12).unwrap();
        assert_eq!(dec.next(), NumberingPeriod::new(2024, 1).unwrap());

        let utc = Utc.fix();
        assert_eq!(
            dec.end_utc(utc).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn period_follows_configured_offset() {
        // 2024-01-31 20:00 UTC is already February in UTC+7
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 20, 0, 0).unwrap();
        let jakarta = FixedOffset::east_opt(7 * 3600).unwrap();

        assert_eq!(
            NumberingPeriod::from_timestamp(now, Utc.fix()),
            NumberingPeriod::new(2024, 1).unwrap()
        );
        let feb = NumberingPeriod::from_timestamp(now, jakarta);
        assert_eq!(feb, NumberingPeriod::new(2024, 2).unwrap());
        assert_eq!(
            feb.start_utc(jakarta).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 17, 0, 0).unwrap()
        );
    }

    proptest! {
        #[test]
        fn display_and_parse_agree(sequence in 1u32..100_000, month in 1u32..=12, year in 1000i32..=9999) {
            let number = SpkNumber { sequence, month, year };
            let rendered = number.to_string();
            prop_assert_eq!(rendered.parse::<SpkNumber>().unwrap(), number);
            prop_assert!(rendered.split('/').next().unwrap().len() >= 3);
        }

        #[test]
        fn period_window_contains_its_timestamps(secs in 0i64..4_102_444_800, offset_min in -720i32..=840) {
            let offset = FixedOffset::east_opt(offset_min * 60).unwrap();
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            let period = NumberingPeriod::from_timestamp(now, offset);
            let start = period.start_utc(offset).unwrap();
            let end = period.end_utc(offset).unwrap();
            prop_assert!(start <= now && now < end);
        }
    }
}
