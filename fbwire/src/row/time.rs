use time::{Date, PrimitiveDateTime, Time};

use super::{Column, Decode, DecodeError, Param, sql_type};

/// Julian day of 1858-11-17, day zero of Firebird dates.
const FB_EPOCH_JULIAN_DAY: i32 = 2_400_001;

/// Firebird time unit, a ten thousandth of a second.
const NANOS_PER_FRACTION: u32 = 100_000;
const FRACTIONS_PER_SECOND: u32 = 10_000;

fn date(days: i32) -> Result<Date, DecodeError> {
    days.checked_add(FB_EPOCH_JULIAN_DAY)
        .and_then(|jd| Date::from_julian_day(jd).ok())
        .ok_or(DecodeError::OutOfRange)
}

fn time(fractions: u32) -> Result<Time, DecodeError> {
    let seconds = fractions / FRACTIONS_PER_SECOND;
    let nanos = (fractions % FRACTIONS_PER_SECOND) * NANOS_PER_FRACTION;
    Time::from_hms_nano((seconds / 3600) as u8, (seconds / 60 % 60) as u8, (seconds % 60) as u8, nanos)
        .map_err(|_| DecodeError::OutOfRange)
}

fn days(date: Date) -> i32 {
    date.to_julian_day() - FB_EPOCH_JULIAN_DAY
}

fn fractions(time: Time) -> u32 {
    let (h, m, s, nanos) = time.as_hms_nano();
    (u32::from(h) * 3600 + u32::from(m) * 60 + u32::from(s)) * FRACTIONS_PER_SECOND
        + nanos / NANOS_PER_FRACTION
}

impl Decode for Date {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        match col.field().sql_type() {
            sql_type::TYPE_DATE => date(i32::from_be_bytes(col.fixed()?)),
            sql_type::TIMESTAMP => PrimitiveDateTime::decode(col).map(PrimitiveDateTime::date),
            found => Err(DecodeError::TypeMismatch(found)),
        }
    }
}

impl Decode for Time {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::TYPE_TIME])?;
        time(u32::from_be_bytes(col.fixed()?))
    }
}

impl Decode for PrimitiveDateTime {
    fn decode(col: Column<'_>) -> Result<Self, DecodeError> {
        col.expect_type(&[sql_type::TIMESTAMP])?;
        let value: [u8; 8] = col.fixed()?;
        let (d, t) = value.split_at(4);
        let d = i32::from_be_bytes([d[0], d[1], d[2], d[3]]);
        let t = u32::from_be_bytes([t[0], t[1], t[2], t[3]]);
        Ok(PrimitiveDateTime::new(date(d)?, time(t)?))
    }
}

impl From<Date> for Param {
    fn from(value: Date) -> Self {
        Self::Date(days(value))
    }
}

impl From<Time> for Param {
    fn from(value: Time) -> Self {
        Self::Time(fractions(value))
    }
}

impl From<PrimitiveDateTime> for Param {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::Timestamp(days(value.date()), fractions(value.time()))
    }
}
