//! Plain-text tables for summaries.

/// Render rows under headers, each column padded to its widest cell
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let rule = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!(" {:<width$} ", c, width = w))
            .collect::<Vec<_>>()
            .join("|")
    };

    let mut out = String::new();
    out.push_str(&format!("+{}+\n", rule));
    out.push_str(&format!("|{}|\n", line(headers.to_vec())));
    out.push_str(&format!("+{}+\n", rule));
    for row in rows {
        out.push_str(&format!("|{}|\n", line(row.iter().map(String::as_str).collect())));
    }
    out.push_str(&format!("+{}+\n", rule));
    out
}
