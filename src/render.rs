// 🖼️ HTML rendering - main page and roster table fragment

use crate::rower::Rower;

/// Element id of the roster table body patched on every update
pub const TABLE_BODY_ID: &str = "rower-table-body";

pub const MAIN_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
	<meta charset="UTF-8">
	<meta name="viewport" content="width=device-width, initial-scale=1.0">
	<title>MastersCalc</title>
	<link rel="stylesheet" type="text/css" href="/static/css/styles.css">
	<script type="module" src="https://cdn.jsdelivr.net/gh/starfederation/datastar@1.0.0-RC.6/bundles/datastar.js"></script>
</head>
<body>
<h1>MastersCalc</h1>
<div class="form-container">
<form>
	<div class="form-group">
		<div class="form-text">Enter each crew member's details.</div>
		<label for="inputName" class="form-label">Name</label>
		<input id="inputName" class="form-control" placeholder="e.g. Bob" value="" data-bind:name>
	</div>
	<div class="form-group">
		<label for="inputYear" class="form-label">Year of Birth / Age on their Birthday this year</label>
		<input id="inputYear" class="form-control" data-attr:placeholder="$example" type="number" min="1" data-bind:birth-year-or-age>
	</div>
	<div class="form-group">
		<button type="button" class="btn btn-secondary" data-attr:disabled="$name.length === 0 || !$birthYearOrAge" data-on:click="@post('/masterscalc/rowers')">Add</button>
	</div>
</form>
</div>
<div class="table-container">
<table>
	<thead>
		<tr>
			<th>Name</th>
			<th>Born</th>
			<th>Age</th>
			<th>Masters Category</th>
			<th>Actions</th>
		</tr>
	</thead>
	<tbody id="rower-table-body" data-init="@get('/masterscalc/rowers')"></tbody>
</table>
</div>
<div class="card">
	<div class="card-body">
	<p class="lead">
		Average age: <span class="badge" data-text="$averageAge"></span>
	</p>
	<p class="lead">
		Crew Masters Category: <span class="badge" data-text="$averageBand"></span>
	</p>
	</div>
</div>
</body>
</html>"#;

/// The `<tbody>` fragment: one row per rower, in roster order, each with a
/// Remove button addressing its current position.
pub fn table_body(rowers: &[Rower]) -> String {
    let mut html = format!("<tbody id=\"{}\">\n", TABLE_BODY_ID);
    for (index, rower) in rowers.iter().enumerate() {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td>\
             <td><button class=\"remove-btn\" data-on:click=\"@delete('/masterscalc/rowers/{}')\">Remove</button></td></tr>\n",
            escape_html(&rower.name),
            rower.birth_year,
            rower.age,
            escape_html(&rower.category),
            index,
        ));
    }
    html.push_str("</tbody>");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '\r' | '\n' => escaped.push(' '),
            _ => escaped.push(c),
        }
    }
    escaped
}
