/// A single PostgREST filter clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq { column: String, value: String },
    IsNull { column: String },
    Like { column: String, pattern: String },
    Or(String),
}

impl Filter {
    fn to_pair(&self) -> (String, String) {
        match self {
            Filter::Eq { column, value } => (column.clone(), format!("eq.{value}")),
            Filter::IsNull { column } => (column.clone(), "is.null".to_string()),
            Filter::Like { column, pattern } => (column.clone(), format!("like.{pattern}")),
            Filter::Or(expr) => ("or".to_string(), format!("({expr})")),
        }
    }
}

/// Fluent builder for a table read, rendered as PostgREST query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    select: Option<String>,
    filters: Vec<Filter>,
    order: Option<(String, bool)>,
    limit: Option<u32>,
    offset: Option<u32>,
    exact_count: bool,
}

impl Query {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            select: None,
            filters: Vec::new(),
            order: None,
            limit: None,
            offset: None,
            exact_count: false,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        if !columns.is_empty() {
            self.select = Some(columns.join(","));
        }
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.filters.push(Filter::IsNull {
            column: column.into(),
        });
        self
    }

    /// `pattern` uses `*` as the wildcard, as PostgREST expects in URLs.
    pub fn like(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::Like {
            column: column.into(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn or(mut self, expr: impl Into<String>) -> Self {
        self.filters.push(Filter::Or(expr.into()));
        self
    }

    /// Case-sensitive substring match of `needle` on any of `columns`.
    ///
    /// Wildcard characters in the needle are dropped; a needle that is empty
    /// afterwards adds no filter.
    pub fn any_contains(self, columns: &[&str], needle: &str) -> Self {
        let needle: String = needle
            .chars()
            .filter(|c| !matches!(c, '*' | '%'))
            .collect();
        if needle.trim().is_empty() || columns.is_empty() {
            return self;
        }
        let pattern = quote_value(&format!("*{needle}*"));
        let expr = columns
            .iter()
            .map(|column| format!("{column}.like.{pattern}"))
            .collect::<Vec<_>>()
            .join(",");
        self.or(expr)
    }

    pub fn order(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order = Some((column.into(), descending));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn exact_count(mut self) -> Self {
        self.exact_count = true;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn wants_count(&self) -> bool {
        self.exact_count
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.filters.len() + 4);
        if let Some(select) = &self.select {
            pairs.push(("select".to_string(), select.clone()));
        }
        pairs.extend(self.filters.iter().map(Filter::to_pair));
        if let Some((column, descending)) = &self.order {
            let direction = if *descending { "desc" } else { "asc" };
            pairs.push(("order".to_string(), format!("{column}.{direction}")));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        pairs
    }
}

// PostgREST list syntax reserves `,.:()`; double quotes protect them.
fn quote_value(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
