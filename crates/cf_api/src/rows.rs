//! Row pagination and size-based truncation for `/first-rows`, `/rows`, `/filter`, and
//! `/search`. Offset/length slice the row set; a second pass caps the page at
//! `rows_max_bytes`/`rows_max_number`, shrinking string cell values (rather than
//! dropping the row outright) so the page is never empty when at least one row exists.

use serde_json::Value;

pub struct RowsPage {
    pub rows: Vec<Value>,
    pub truncated: bool,
}

/// Slice `all_rows[offset..offset+length]`, then cap the slice at `rows_max_bytes` total
/// serialized size and `rows_max_number` rows, whichever is hit first. The first row is
/// always kept (shrinking its string fields if it alone exceeds the byte budget), so a
/// non-empty input page never truncates down to nothing.
pub fn paginate_and_truncate(
    all_rows: &[Value],
    offset: usize,
    length: usize,
    rows_max_bytes: usize,
    rows_max_number: usize,
) -> RowsPage {
    let page: Vec<&Value> = all_rows.iter().skip(offset).take(length).collect();

    let mut rows = Vec::new();
    let mut total_bytes = 0usize;
    let mut truncated = false;

    for row in &page {
        if rows.len() >= rows_max_number {
            truncated = true;
            break;
        }

        let row_bytes = json_size(row);
        if rows.is_empty() || total_bytes + row_bytes <= rows_max_bytes {
            if total_bytes + row_bytes > rows_max_bytes {
                // First row alone exceeds the budget: keep it, but shrink its cells.
                let shrunk = shrink_row_to_bytes(row, rows_max_bytes);
                total_bytes += json_size(&shrunk);
                rows.push(shrunk);
                truncated = true;
            } else {
                total_bytes += row_bytes;
                rows.push((*row).clone());
            }
        } else {
            truncated = true;
            break;
        }
    }

    if rows.len() < page.len() {
        truncated = true;
    }

    RowsPage { rows, truncated }
}

fn json_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

/// Repeatedly halves the longest string-valued top-level field until the row's
/// serialized size fits `max_bytes`, or no field is worth shrinking further.
fn shrink_row_to_bytes(row: &Value, max_bytes: usize) -> Value {
    let mut row = row.clone();
    loop {
        if json_size(&row) <= max_bytes {
            break;
        }
        let Some(obj) = row.as_object_mut() else { break };
        let longest = obj
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.len())))
            .max_by_key(|(_, len)| *len);
        let Some((key, len)) = longest else { break };
        if len <= 16 {
            break;
        }
        if let Some(Value::String(s)) = obj.get(&key) {
            let half = (s.len() / 2).max(16);
            let shrunk: String = s.chars().take(half).collect();
            obj.insert(key, Value::String(shrunk));
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slices_by_offset_and_length() {
        let rows: Vec<Value> = (0..10).map(|i| json!({"i": i})).collect();
        let page = paginate_and_truncate(&rows, 2, 3, 1_000_000, 100);
        assert_eq!(page.rows, vec![json!({"i": 2}), json!({"i": 3}), json!({"i": 4})]);
        assert!(!page.truncated);
    }

    #[test]
    fn truncates_by_row_count() {
        let rows: Vec<Value> = (0..10).map(|i| json!({"i": i})).collect();
        let page = paginate_and_truncate(&rows, 0, 10, 1_000_000, 3);
        assert_eq!(page.rows.len(), 3);
        assert!(page.truncated);
    }

    #[test]
    fn oversized_rows_are_shrunk_not_dropped() {
        // 15 rows, each ~1234 bytes once serialized, matching the documented truncation scenario.
        let big_text = "x".repeat(1200);
        let rows: Vec<Value> = (0..15).map(|i| json!({"idx": i, "text": big_text})).collect();

        let page = paginate_and_truncate(&rows, 0, 15, 1000, 20);

        assert!(page.truncated);
        assert!(!page.rows.is_empty());
        let total: usize = page.rows.iter().map(json_size).sum();
        assert!(total <= 1000, "total size {total} exceeded rows_max_bytes");
    }
}
