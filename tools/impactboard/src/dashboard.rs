use crate::config::DashboardConfig;
use crate::errors::ImpactError;
use crate::model::EngineerScore;
use crate::snapshot::ScoreSnapshot;
use ratatui::backend::TestBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table};
use ratatui::Terminal;

/// Case-insensitive substring match against any bot pattern.
pub fn is_bot_login(login: &str, patterns: &[String]) -> bool {
    let login = login.to_lowercase();
    patterns
        .iter()
        .any(|pattern| login.contains(&pattern.to_lowercase()))
}

/// Scores that survive the bot and impact filters, capped at `top_n`, in rank order.
pub fn visible_scores<'a>(
    scores: &'a [EngineerScore],
    cfg: &DashboardConfig,
) -> Vec<&'a EngineerScore> {
    scores
        .iter()
        .filter(|score| !(cfg.hide_bots && is_bot_login(&score.login, &cfg.bot_patterns)))
        .filter(|score| score.final_impact >= cfg.min_impact)
        .take(cfg.top_n)
        .collect()
}

fn window_label(snapshot: &ScoreSnapshot) -> String {
    let day = |stamp: &str| stamp.get(..10).unwrap_or(stamp).to_string();
    format!(
        "{}..{}",
        day(&snapshot.metadata.window_start),
        day(&snapshot.metadata.window_end)
    )
}

fn leaderboard_row(score: &EngineerScore) -> Row<'static> {
    Row::new(vec![
        format!("{}", score.rank),
        score.login.clone(),
        format!("{:.2}", score.final_impact),
        format!("{:.1}", score.shipping_total),
        format!("{:.1}", score.review_total),
        format!("{:.0}%", score.core_touch_ratio * 100.0),
        format!("{}", score.active_weeks),
    ])
}

fn breakdown_lines(leader: Option<&EngineerScore>) -> Vec<Line<'static>> {
    let Some(score) = leader else {
        return vec![Line::from("no engineers match the current filters")];
    };
    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                score.login.clone(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("  impact={:.2}", score.final_impact)),
        ]),
        Line::from(format!(
            "base={:.2} core x{:.3} consistency x{:.3}",
            score.base_impact, score.core_multiplier, score.consistency_bonus
        )),
        Line::from(format!(
            "prs={} reviews={} weeks={}",
            score.pr_count, score.review_count, score.active_weeks
        )),
    ];
    for pr in &score.top_prs {
        lines.push(Line::from(format!(
            "#{} ship={:.2} {}",
            pr.number, pr.shipping, pr.title
        )));
    }
    lines
}

pub fn render_dashboard(
    snapshot: &ScoreSnapshot,
    cfg: &DashboardConfig,
    width: u16,
    height: u16,
) -> Result<String, ImpactError> {
    let rows = visible_scores(&snapshot.scores, cfg);
    let backend = TestBackend::new(width, height);
    let mut terminal =
        Terminal::new(backend).map_err(|e| ImpactError::Render(format!("terminal: {e}")))?;
    terminal
        .draw(|frame| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Min(5),
                    Constraint::Length(8),
                ])
                .split(frame.area());

            let header = Paragraph::new(format!(
                "engineers={} prs={} window={} computed={}",
                snapshot.metadata.engineer_count,
                snapshot.metadata.pr_count,
                window_label(snapshot),
                snapshot
                    .metadata
                    .computed_at
                    .get(..10)
                    .unwrap_or(&snapshot.metadata.computed_at)
            ))
            .block(Block::default().borders(Borders::ALL).title("Impact"));
            frame.render_widget(header, chunks[0]);

            let table = Table::new(
                rows.iter().map(|score| leaderboard_row(score)),
                [
                    Constraint::Length(4),
                    Constraint::Min(12),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(6),
                    Constraint::Length(6),
                ],
            )
            .header(
                Row::new(vec!["#", "login", "impact", "ship", "review", "core", "weeks"])
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .block(Block::default().borders(Borders::ALL).title("Leaderboard"));
            frame.render_widget(table, chunks[1]);

            let bottom = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[2]);

            frame.render_widget(
                Paragraph::new(breakdown_lines(rows.first().copied()))
                    .block(Block::default().borders(Borders::ALL).title("Breakdown")),
                bottom[0],
            );

            let dirs = snapshot
                .metadata
                .core_directories
                .iter()
                .map(|dir| ListItem::new(dir.clone()))
                .collect::<Vec<_>>();
            frame.render_widget(
                List::new(dirs).block(Block::default().borders(Borders::ALL).title("Core dirs")),
                bottom[1],
            );
        })
        .map_err(|e| ImpactError::Render(format!("draw: {e}")))?;

    let buffer = terminal.backend().buffer();
    let mut out = String::new();
    for y in 0..height {
        for x in 0..width {
            out.push_str(buffer.cell((x, y)).map_or(" ", |cell| cell.symbol()));
        }
        out.push('\n');
    }
    Ok(out)
}

/// Plain-text top-`limit` summary for non-interactive runs.
pub fn render_text_report(snapshot: &ScoreSnapshot, limit: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "Top {} engineers by FinalImpact (from {} merged PRs):",
        limit.min(snapshot.scores.len()),
        snapshot.metadata.pr_count
    )];
    for score in snapshot.scores.iter().take(limit) {
        lines.push(format!(
            "{:>3}. {:<25} Impact={:>8.2}  Ship={:.1}  Rev={:.1}  CoreRatio={:.2}  Weeks={}",
            score.rank,
            score.login,
            score.final_impact,
            score.shipping_total,
            score.review_total,
            score.core_touch_ratio,
            score.active_weeks
        ));
    }
    lines
}
