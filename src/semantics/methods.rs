//! Method-name tables for LINQ and EF Core operators.

/// Deferred operators: compose the query without running it.
pub const DEFERRED_OPERATORS: &[&str] = &[
    "Where",
    "Select",
    "SelectMany",
    "OrderBy",
    "OrderByDescending",
    "ThenBy",
    "ThenByDescending",
    "GroupBy",
    "Join",
    "GroupJoin",
    "LeftJoin",
    "Skip",
    "Take",
    "SkipWhile",
    "TakeWhile",
    "Distinct",
    "DistinctBy",
    "Union",
    "Concat",
    "Intersect",
    "Except",
    "Reverse",
    "Cast",
    "OfType",
    "DefaultIfEmpty",
    "Include",
    "ThenInclude",
    "AsNoTracking",
    "AsNoTrackingWithIdentityResolution",
    "AsTracking",
    "AsSplitQuery",
    "AsSingleQuery",
    "IgnoreQueryFilters",
    "IgnoreAutoIncludes",
    "TagWith",
    "TagWithCallSite",
    "FromSqlRaw",
    "FromSqlInterpolated",
    "FromSql",
];

/// Calls that pull the results into an in-memory collection.
pub const MATERIALIZING: &[&str] = &["ToList", "ToArray", "ToDictionary", "ToHashSet", "ToLookup"];

/// Calls after which subsequent operators run in memory.
pub const IN_MEMORY_SWITCHES: &[&str] = &[
    "ToList",
    "ToArray",
    "ToDictionary",
    "ToHashSet",
    "ToLookup",
    "AsEnumerable",
];

/// In-memory switches that keep every row as one element, so counting the
/// result counts the rows of the query.
pub const ROW_PRESERVING: &[&str] = &["ToList", "ToArray", "AsEnumerable"];

/// Calls that execute the query and return a scalar or a single element.
pub const TERMINALS: &[&str] = &[
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "ElementAt",
    "ElementAtOrDefault",
    "Count",
    "LongCount",
    "Any",
    "All",
    "Sum",
    "Min",
    "Max",
    "Average",
    "Contains",
    "Load",
    "ForEach",
    "ExecuteUpdate",
    "ExecuteDelete",
];

/// Terminals that return entities (and so participate in change tracking).
pub const ENTITY_RETURNING: &[&str] = &[
    "ToList",
    "ToArray",
    "ToDictionary",
    "ToHashSet",
    "ToLookup",
    "AsEnumerable",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "ElementAt",
    "ElementAtOrDefault",
];

/// Operators whose lambda arguments are translated to SQL.
pub const LAMBDA_OPERATORS: &[&str] = &[
    "Where",
    "Select",
    "SelectMany",
    "OrderBy",
    "OrderByDescending",
    "ThenBy",
    "ThenByDescending",
    "GroupBy",
    "Join",
    "GroupJoin",
    "SkipWhile",
    "TakeWhile",
    "DistinctBy",
    "Include",
    "ThenInclude",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "Count",
    "LongCount",
    "Any",
    "All",
    "Sum",
    "Min",
    "Max",
    "Average",
    "ExecuteUpdate",
    "ExecuteDelete",
    "SetProperty",
];

/// Operators whose lambda is a row filter.
pub const FILTER_OPERATORS: &[&str] = &[
    "Where",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "Count",
    "LongCount",
    "Any",
    "All",
    "SkipWhile",
    "TakeWhile",
];

/// In-memory operators whose lambda runs once per element.
pub const PER_ITEM_OPERATORS: &[&str] = &[
    "ForEach",
    "Select",
    "SelectMany",
    "Where",
    "Any",
    "All",
    "Sum",
    "Count",
    "ToDictionary",
    "ToLookup",
    "GroupBy",
    "OrderBy",
    "Aggregate",
];

/// Ordering operators.
pub const ORDERING: &[&str] = &["OrderBy", "OrderByDescending"];

/// Tracking-mode markers.
pub const TRACKING_MARKERS: &[&str] = &[
    "AsNoTracking",
    "AsNoTrackingWithIdentityResolution",
    "AsTracking",
];

/// Projection operators (results are not tracked entities).
pub const PROJECTIONS: &[&str] = &["Select", "SelectMany", "GroupBy", "Join", "GroupJoin"];

/// Context calls that write through change tracking.
pub const WRITE_CALLS: &[&str] = &[
    "SaveChanges",
    "Add",
    "AddRange",
    "Update",
    "UpdateRange",
    "Remove",
    "RemoveRange",
    "Attach",
    "AttachRange",
    "Entry",
];

/// Strip the `Async` suffix: `ToListAsync` becomes `ToList`.
pub fn base_name(name: &str) -> &str {
    name.strip_suffix("Async").unwrap_or(name)
}

/// Whether `name` (or its async form) is in `table`.
pub fn is_in(table: &[&str], name: &str) -> bool {
    table.contains(&base_name(name))
}

/// Whether the call executes the query.
pub fn is_executing(name: &str) -> bool {
    is_in(IN_MEMORY_SWITCHES, name) || is_in(TERMINALS, name) || name == "AsAsyncEnumerable"
}
