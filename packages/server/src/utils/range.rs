use axum::http::HeaderValue;

use crate::error::AppError;

/// Parse a `Range` request header against a resource of `total` bytes.
///
/// Supports a single range in the `bytes=a-b`, `bytes=a-` and `bytes=-n`
/// forms. Returns `Ok(None)` when no range was requested (or a zero-length
/// suffix, which the protocol treats as the full body). Out-of-bounds or
/// inverted ranges fail with `RangeNotSatisfiable` carrying the true total so
/// the client can recompute.
pub fn parse_range(
    value: Option<&HeaderValue>,
    total: u64,
) -> Result<Option<(u64, u64)>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if total == 0 {
        return Err(AppError::RangeNotSatisfiable { total });
    }
    let value = value
        .to_str()
        .map_err(|_| AppError::Validation("invalid Range header".into()))?;
    let Some(range) = value.strip_prefix("bytes=") else {
        return Err(AppError::Validation("invalid Range header".into()));
    };
    if range.contains(',') {
        return Err(AppError::Validation("multiple ranges not supported".into()));
    }

    let mut parts = range.splitn(2, '-');
    let start_part = parts.next().unwrap_or_default();
    let end_part = parts.next().unwrap_or_default();

    let (start, end) = if start_part.is_empty() {
        let suffix: u64 = end_part
            .parse()
            .map_err(|_| AppError::Validation("invalid Range header".into()))?;
        if suffix == 0 {
            return Ok(None);
        }
        let start = total.saturating_sub(suffix);
        (start, total - 1)
    } else {
        let start: u64 = start_part
            .parse()
            .map_err(|_| AppError::Validation("invalid Range header".into()))?;
        let end: u64 = if end_part.is_empty() {
            total - 1
        } else {
            end_part
                .parse()
                .map_err(|_| AppError::Validation("invalid Range header".into()))?
        };
        (start, end)
    };

    if start > end || start >= total {
        return Err(AppError::RangeNotSatisfiable { total });
    }

    Ok(Some((start, end.min(total - 1))))
}
