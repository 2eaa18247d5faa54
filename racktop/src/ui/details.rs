//! Detail tables: the app server's VMs and the storage server's filesystems.

use ratatui::{
    layout::{Constraint, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Row, Table},
};

use crate::types::{FilesystemStats, VmMetrics};
use crate::ui::theme::{LIVE, MUTED};
use crate::ui::util::{human_count, human_gb, truncate_middle, uptime, usage_color};

const VM_COLS: [Constraint; 6] = [
    Constraint::Length(6),      // VMID
    Constraint::Percentage(30), // Name
    Constraint::Length(9),      // Status
    Constraint::Length(8),      // CPU %
    Constraint::Length(16),     // Memory
    Constraint::Length(9),      // Disk
];

const FS_COLS: [Constraint; 5] = [
    Constraint::Percentage(35), // Mount
    Constraint::Length(18),     // Used
    Constraint::Length(8),      // Use %
    Constraint::Length(8),      // Files
    Constraint::Length(10),     // Avg size
];

fn header(cells: &[&'static str]) -> Row<'static> {
    Row::new(cells.iter().copied().map(Cell::from))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
}

pub fn vm_row(vm: &VmMetrics, name_width: usize) -> Row<'static> {
    let status_fg = if vm.is_running() { LIVE } else { MUTED };
    let mut name = truncate_middle(&vm.name, name_width.max(4));
    if let Some(secs) = vm.uptime_seconds.filter(|_| vm.is_running()) {
        name = format!("{name} ({})", uptime(secs));
    }
    Row::new(vec![
        Cell::from(vm.vmid.to_string()).style(Style::default().fg(MUTED)),
        Cell::from(name),
        Cell::from(vm.status.clone()).style(Style::default().fg(status_fg)),
        Cell::from(format!("{:.1}%", vm.cpu_usage)).style(Style::default().fg(usage_color(vm.cpu_usage))),
        Cell::from(format!("{} / {}", human_gb(vm.memory_used_gb), human_gb(vm.memory_total_gb))),
        Cell::from(human_gb(vm.disk_usage_gb)),
    ])
}

pub fn draw_vms(f: &mut ratatui::Frame<'_>, area: Rect, vms: &[VmMetrics]) {
    let running = vms.iter().filter(|vm| vm.is_running()).count();
    let name_width = (area.width as usize * 30 / 100).saturating_sub(2);
    let table = Table::new(vms.iter().map(|vm| vm_row(vm, name_width)), VM_COLS)
        .header(header(&["VMID", "Name", "Status", "CPU %", "Memory", "Disk"]))
        .column_spacing(1)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Virtual Machines ({running}/{} running)", vms.len())),
        );
    f.render_widget(table, area);
}

pub fn draw_filesystems(f: &mut ratatui::Frame<'_>, area: Rect, filesystems: &[FilesystemStats]) {
    let mount_width = (area.width as usize * 35 / 100).saturating_sub(2);
    let rows = filesystems.iter().map(|fs| {
        Row::new(vec![
            Cell::from(truncate_middle(&fs.mount_point, mount_width.max(4))),
            Cell::from(format!("{} / {}", human_gb(fs.used_gb), human_gb(fs.total_gb))),
            Cell::from(format!("{:.1}%", fs.usage_percent))
                .style(Style::default().fg(usage_color(fs.usage_percent))),
            Cell::from(human_count(fs.file_count)),
            Cell::from(format!("{:.1}MB", fs.avg_file_size_mb)),
        ])
    });
    let table = Table::new(rows, FS_COLS)
        .header(header(&["Mount", "Used", "Use %", "Files", "Avg size"]))
        .column_spacing(1)
        .block(Block::default().borders(Borders::ALL).title("Storage Filesystems"));
    f.render_widget(table, area);
}
