use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

/// Print a shell command the operator can copy
pub fn command(cmd: &str) {
    println!("    {} {}", "$".dimmed(), cmd.bold());
}

/// Print captured command output, indented and dimmed, keeping the tail
pub fn output_tail(output: &str, max_lines: usize) {
    let lines: Vec<&str> = output.lines().collect();
    let skip = lines.len().saturating_sub(max_lines);
    if skip > 0 {
        dim(&format!("... {skip} earlier lines omitted"));
    }
    for line in &lines[skip..] {
        dim(line);
    }
}

// ============================================================================
// Size Formatting
// ============================================================================

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Colored label for a stage state
pub fn stage_state(state: provision::StageState) -> colored::ColoredString {
    use provision::StageState;

    match state {
        StageState::Pending => "pending".dimmed(),
        StageState::Running => "interrupted".yellow(),
        StageState::Completed => "completed".green(),
        StageState::Failed => "failed".red().bold(),
    }
}

// ============================================================================
// Tests
// ============================================================================
