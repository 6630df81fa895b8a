//! Serde adapters shared by configuration types.

/// `Duration` as a `[D.]HH:MM[:SS[.fffffffff]]` string.
///
/// Used for both time-of-day window bounds (`"09:00:00"`, `"24:00:00"`) and
/// plain durations (`"00:15:00"`, `"1.00:00:00"`).
pub mod hms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Render a duration as `HH:MM:SS`, with a trimmed fraction when present.
    #[must_use]
    pub fn format(value: Duration) -> String {
        let total = value.as_secs();
        let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
        let nanos = value.subsec_nanos();
        if nanos == 0 {
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        } else {
            let fraction = format!("{nanos:09}");
            format!(
                "{hours:02}:{minutes:02}:{seconds:02}.{}",
                fraction.trim_end_matches('0')
            )
        }
    }

    /// Parse `[D.]HH:MM[:SS[.fffffffff]]`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed component.
    pub fn parse(input: &str) -> Result<Duration, String> {
        let input = input.trim();
        let colon = input
            .find(':')
            .ok_or_else(|| format!("`{input}` is not a HH:MM:SS value"))?;

        let (days, rest) = match input[..colon].split_once('.') {
            Some((days, _)) => (parse_unit(days, "days")?, &input[days.len() + 1..]),
            None => (0, input),
        };

        let mut parts = rest.split(':');
        let hours = parse_unit(parts.next().unwrap_or_default(), "hours")?;
        let minutes = parse_unit(parts.next().unwrap_or_default(), "minutes")?;
        let (seconds, nanos) = match parts.next() {
            Some(seconds) => parse_seconds(seconds)?,
            None => (0, 0),
        };
        if parts.next().is_some() {
            return Err(format!("`{input}` has too many components"));
        }
        if minutes >= 60 || seconds >= 60 {
            return Err(format!("`{input}` has minutes or seconds out of range"));
        }

        let secs = days
            .checked_mul(86_400)
            .and_then(|d| hours.checked_mul(3600).and_then(|h| d.checked_add(h)))
            .and_then(|s| s.checked_add(minutes * 60 + seconds))
            .ok_or_else(|| format!("`{input}` overflows"))?;
        Ok(Duration::new(secs, nanos))
    }

    fn parse_unit(value: &str, what: &str) -> Result<u64, String> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid {what} component `{value}`"));
        }
        value
            .parse()
            .map_err(|e| format!("invalid {what} component `{value}`: {e}"))
    }

    fn parse_seconds(value: &str) -> Result<(u64, u32), String> {
        let Some((whole, fraction)) = value.split_once('.') else {
            return Ok((parse_unit(value, "seconds")?, 0));
        };
        if fraction.is_empty()
            || fraction.len() > 9
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("invalid fractional seconds `{value}`"));
        }
        let nanos = fraction
            .parse::<u32>()
            .map_err(|e| format!("invalid fractional seconds `{value}`: {e}"))?
            * 10u32.pow(9 - u32::try_from(fraction.len()).unwrap_or(9));
        Ok((parse_unit(whole, "seconds")?, nanos))
    }

    /// Serialize a `Duration`.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*value))
    }

    /// Deserialize a `Duration`.
    ///
    /// # Errors
    ///
    /// Fails when the string is not a valid `HH:MM:SS` value.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// `Option<Duration>` variant, for optional configuration fields.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional `Duration`.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&super::format(*d)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional `Duration`.
        ///
        /// # Errors
        ///
        /// Fails when a present string is not a valid `HH:MM:SS` value.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

}
