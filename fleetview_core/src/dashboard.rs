//! FleetView TUI Dashboard Module
//! ===============================
//!
//! Terminal rendering of a `VisualizationController` scene.
//! Uses Ratatui for rendering and Crossterm for keyboard input.
//!
//! Enable with the `dashboard` feature flag.
//!
//! Features:
//! - Floor map canvas with robots, trails and heat tiles
//! - Robot table (status, battery, task) with the selection highlighted
//! - Connection and phase status line
//! - Keyboard controls for zoom, floor, layers, pan and selection

use std::io::{self, Stdout};
use std::ops::ControlFlow;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::canvas::{Canvas, Line as CanvasLine, Rectangle},
    widgets::{Block, Borders, Paragraph, Row, Table},
    Frame, Terminal,
};

use crate::controller::{ControllerPhase, Scene, VisualizationController};
use crate::model::{ConnectionState, EntityRef, RobotStatus};
use fleetview_env::FleetContext;

/// Screen-space pan per arrow key press
const PAN_STEP_PX: f64 = 20.0;

// =============================================================================
// COMMANDS
// =============================================================================

/// A user action decoded from a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardCommand {
    ZoomIn,
    ZoomOut,
    CycleFloor,
    ToggleHeatmap,
    TogglePaths,
    Pan(i8, i8),
    SelectNext,
    ClearSelection,
    ResetView,
    Quit,
}

impl DashboardCommand {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('+') | KeyCode::Char('=') => Some(Self::ZoomIn),
            KeyCode::Char('-') => Some(Self::ZoomOut),
            KeyCode::Char('f') => Some(Self::CycleFloor),
            KeyCode::Char('h') => Some(Self::ToggleHeatmap),
            KeyCode::Char('p') => Some(Self::TogglePaths),
            KeyCode::Char('r') => Some(Self::ResetView),
            KeyCode::Left => Some(Self::Pan(-1, 0)),
            KeyCode::Right => Some(Self::Pan(1, 0)),
            KeyCode::Up => Some(Self::Pan(0, -1)),
            KeyCode::Down => Some(Self::Pan(0, 1)),
            KeyCode::Tab => Some(Self::SelectNext),
            KeyCode::Esc => Some(Self::ClearSelection),
            KeyCode::Char('q') => Some(Self::Quit),
            _ => None,
        }
    }

    /// Applies the command. `Break` means the user asked to quit.
    pub fn apply<C: FleetContext>(
        self,
        controller: &mut VisualizationController<C>,
        scene: &Scene,
    ) -> ControlFlow<()> {
        match self {
            Self::ZoomIn => {
                controller.zoom_in();
            }
            Self::ZoomOut => {
                controller.zoom_out();
            }
            Self::CycleFloor => controller.cycle_floor(),
            Self::ToggleHeatmap => {
                controller.toggle_heatmap();
            }
            Self::TogglePaths => {
                controller.toggle_paths();
            }
            Self::Pan(dx, dy) => controller.pan_by(dx as f64 * PAN_STEP_PX, dy as f64 * PAN_STEP_PX),
            Self::SelectNext => {
                let current = scene.robots.iter().position(|r| r.selected);
                let next = current.map_or(0, |i| i + 1) % scene.robots.len().max(1);
                if let Some(robot) = scene.robots.get(next) {
                    controller.select_robot(&robot.robot_id);
                }
            }
            Self::ClearSelection => controller.clear_selection(),
            Self::ResetView => controller.reset_view(),
            Self::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }
}

// =============================================================================
// FLEET DASHBOARD
// =============================================================================

/// TUI dashboard driving a controller's frame loop.
pub struct FleetDashboard {
    /// Screen-space extent mapped onto the map canvas
    viewport: (f64, f64),
    frame_count: usize,
}

impl Default for FleetDashboard {
    fn default() -> Self {
        Self::new(800.0, 480.0)
    }
}

impl FleetDashboard {
    pub fn new(width_px: f64, height_px: f64) -> Self {
        Self {
            viewport: (width_px, height_px),
            frame_count: 0,
        }
    }

    /// Run the TUI main loop (until 'q' pressed or the controller is disposed).
    pub async fn run<C: FleetContext>(
        &mut self,
        controller: &mut VisualizationController<C>,
        frame_interval: Duration,
    ) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal: Terminal<CrosstermBackend<Stdout>> = Terminal::new(CrosstermBackend::new(stdout))?;

        let result = self.event_loop(&mut terminal, controller, frame_interval).await;

        // Restore terminal even when drawing failed
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        controller.unmount();

        result
    }

    async fn event_loop<B: Backend, C: FleetContext>(
        &mut self,
        terminal: &mut Terminal<B>,
        controller: &mut VisualizationController<C>,
        frame_interval: Duration,
    ) -> io::Result<()> {
        loop {
            tokio::time::sleep(frame_interval).await;
            let Some(scene) = controller.tick() else {
                return Ok(());
            };
            self.draw(terminal, &scene)?;

            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    if let Some(command) = DashboardCommand::from_key(key.code) {
                        if command.apply(controller, &scene).is_break() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Draws one scene onto any backend.
    pub fn draw<B: Backend>(&mut self, terminal: &mut Terminal<B>, scene: &Scene) -> io::Result<()> {
        terminal.draw(|f| self.ui(f, scene))?;
        self.frame_count += 1;
        Ok(())
    }

    fn ui(&self, f: &mut Frame, scene: &Scene) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(8),    // Map + robot table
                Constraint::Length(1), // Footer
            ])
            .split(f.area());

        // === HEADER ===
        let (phase_text, phase_color) = phase_style(&scene.phase, scene.connection);
        let floor = scene
            .active_floor_id
            .as_ref()
            .map_or_else(|| "all".to_string(), |f| f.to_string());
        let header = Paragraph::new(Line::from(vec![
            Span::styled("FleetView", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::styled(phase_text, Style::default().fg(phase_color).add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::raw(scene.status_text.clone()),
            Span::raw("  |  "),
            Span::styled(format!("zoom {}%  floor {}", scene.zoom_percent, floor), Style::default().fg(Color::Cyan)),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));
        f.render_widget(header, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(chunks[1]);

        // === MAP ===
        let (width, height) = self.viewport;
        let map = Canvas::default()
            .block(Block::default().title("Floor Map").borders(Borders::ALL))
            .x_bounds([0.0, width])
            .y_bounds([0.0, height])
            .paint(|ctx| {
                for tile in &scene.heat_tiles {
                    ctx.draw(&Rectangle {
                        x: tile.screen.x,
                        y: height - tile.screen.y - tile.size_px,
                        width: tile.size_px,
                        height: tile.size_px,
                        color: heat_color(tile.intensity),
                    });
                }
                for trail in &scene.trails {
                    for pair in trail.points.windows(2) {
                        ctx.draw(&CanvasLine {
                            x1: pair[0].x,
                            y1: height - pair[0].y,
                            x2: pair[1].x,
                            y2: height - pair[1].y,
                            color: Color::DarkGray,
                        });
                    }
                }
                ctx.layer();
                for robot in &scene.robots {
                    let glyph = if robot.selected { "@" } else { "o" };
                    let mut style = Style::default().fg(status_color(robot.status));
                    if robot.selected {
                        style = style.add_modifier(Modifier::BOLD);
                    }
                    ctx.print(robot.screen.x, height - robot.screen.y, Span::styled(glyph, style));
                }
            });
        f.render_widget(map, body[0]);

        // === ROBOT TABLE ===
        let header_cells = ["Robot", "Status", "Batt", "Task"]
            .iter()
            .map(|h| Span::styled(*h, Style::default().add_modifier(Modifier::BOLD)));
        let header = Row::new(header_cells).height(1);

        let rows: Vec<Row> = scene
            .robots
            .iter()
            .map(|robot| {
                let row = Row::new(vec![
                    Span::raw(robot.name.clone()),
                    Span::styled(robot.status.label(), Style::default().fg(status_color(robot.status))),
                    Span::styled(
                        format!("{:>3.0}%", robot.battery_level),
                        Style::default().fg(battery_color(robot.battery_level)),
                    ),
                    Span::raw(robot.current_task_id.clone().unwrap_or_else(|| "-".to_string())),
                ]);
                if robot.selected {
                    row.style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    row
                }
            })
            .collect();

        let title = match &scene.selected {
            Some(EntityRef::Zone(zone)) => format!("Robots (zone {} selected)", zone),
            _ => format!("Robots ({})", scene.robots.len()),
        };
        let table = Table::new(
            rows,
            [
                Constraint::Length(12),
                Constraint::Length(9),
                Constraint::Length(5),
                Constraint::Min(6),
            ],
        )
        .header(header)
        .block(Block::default().title(title).borders(Borders::ALL));
        f.render_widget(table, body[1]);

        // === FOOTER ===
        let footer = Paragraph::new("+/- zoom  f floor  h heat  p paths  arrows pan  tab select  r reset  q quit")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(footer, chunks[2]);
    }
}

fn phase_style(phase: &ControllerPhase, connection: ConnectionState) -> (String, Color) {
    match phase {
        ControllerPhase::Loading => ("LOADING".to_string(), Color::Yellow),
        ControllerPhase::Error(_) => ("ERROR".to_string(), Color::Red),
        ControllerPhase::Disposed => ("CLOSED".to_string(), Color::DarkGray),
        ControllerPhase::Ready => match connection {
            ConnectionState::Live => ("LIVE".to_string(), Color::Green),
            ConnectionState::DegradedPolling => ("POLLING".to_string(), Color::Yellow),
            other => (other.label().to_uppercase(), Color::Gray),
        },
    }
}

fn status_color(status: RobotStatus) -> Color {
    match status {
        RobotStatus::Idle => Color::Gray,
        RobotStatus::Working => Color::Green,
        RobotStatus::Charging => Color::Cyan,
        RobotStatus::Error => Color::Red,
        RobotStatus::Offline => Color::DarkGray,
    }
}

fn battery_color(level: f64) -> Color {
    if level < 20.0 {
        Color::Red
    } else if level < 50.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

fn heat_color(intensity: f64) -> Color {
    if intensity > 0.66 {
        Color::Red
    } else if intensity > 0.33 {
        Color::LightRed
    } else {
        Color::Yellow
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::RobotSprite;
    use crate::model::RobotId;
    use nalgebra::Point2;
    use ratatui::backend::TestBackend;

    fn scene() -> Scene {
        Scene {
            frame: 1,
            timestamp: Duration::from_millis(16),
            phase: ControllerPhase::Ready,
            connection: ConnectionState::Live,
            status_text: "1 robots, 0 zones | live".to_string(),
            zoom_percent: 100,
            active_floor_id: None,
            robots: vec![RobotSprite {
                robot_id: RobotId::from("r1"),
                name: "Atlas".to_string(),
                status: RobotStatus::Working,
                world: Point2::new(1.0, 1.0),
                screen: Point2::new(20.0, 20.0),
                orientation: 0.0,
                battery_level: 15.0,
                current_task_id: Some("T-7".to_string()),
                selected: true,
            }],
            zones: Vec::new(),
            heat_tiles: Vec::new(),
            trails: Vec::new(),
            selected: Some(EntityRef::Robot(RobotId::from("r1"))),
        }
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(DashboardCommand::from_key(KeyCode::Char('+')), Some(DashboardCommand::ZoomIn));
        assert_eq!(DashboardCommand::from_key(KeyCode::Char('-')), Some(DashboardCommand::ZoomOut));
        assert_eq!(DashboardCommand::from_key(KeyCode::Left), Some(DashboardCommand::Pan(-1, 0)));
        assert_eq!(DashboardCommand::from_key(KeyCode::Char('q')), Some(DashboardCommand::Quit));
        assert_eq!(DashboardCommand::from_key(KeyCode::Char('x')), None);
    }

    #[test]
    fn test_scene_renders_status_and_robot_row() {
        let mut terminal = Terminal::new(TestBackend::new(120, 24)).unwrap();
        let mut dashboard = FleetDashboard::default();
        dashboard.draw(&mut terminal, &scene()).unwrap();

        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(rendered.contains("LIVE"));
        assert!(rendered.contains("Atlas"));
        assert!(rendered.contains("T-7"));
        assert_eq!(dashboard.frame_count, 1);
    }

    #[test]
    fn test_phase_style() {
        assert_eq!(phase_style(&ControllerPhase::Loading, ConnectionState::Connecting).0, "LOADING");
        assert_eq!(
            phase_style(&ControllerPhase::Ready, ConnectionState::DegradedPolling).0,
            "POLLING"
        );
        assert_eq!(battery_color(15.0), Color::Red);
    }
}
